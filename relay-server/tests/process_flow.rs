//! 序列执行引擎端到端场景
//!
//! 内存数据库 + 亚秒级步长，吃准时间窗口宽裕的检查点。

use std::time::Duration;

use relay_server::core::{BackgroundTasks, Config, ServerState};
use relay_server::db::models::{
    GpioConfig, GpioState, MachineCreate, SequenceCreate, SequenceStep,
};
use relay_server::db::repository::SequenceRepository;
use relay_server::engine::lock_state_consistent;
use relay_server::events::{EventKind, EventQuery};
use shared::request::HeartbeatRequest;
use shared::util::now_millis;
use tokio::time::sleep;

fn test_config(heartbeat_timeout_ms: i64) -> Config {
    Config {
        work_dir: "/tmp/relay-test".into(),
        http_port: 0,
        heartbeat_timeout_ms,
        restart_stale_window_ms: 10 * 60 * 1000,
        webhook_secret: "test-secret".into(),
        environment: "development".into(),
        event_buffer_size: 64,
    }
}

async fn setup(heartbeat_timeout_ms: i64) -> (ServerState, BackgroundTasks) {
    let config = test_config(heartbeat_timeout_ms);
    let state = ServerState::initialize_in_memory(&config).await;
    let mut tasks = BackgroundTasks::new();
    state.start_background_tasks(&mut tasks);
    (state, tasks)
}

fn gpio(pin: u8, name: &str) -> GpioConfig {
    serde_json::from_value(serde_json::json!({
        "gpio_number": pin,
        "gpio_name": name,
    }))
    .expect("gpio config")
}

async fn create_machine(state: &ServerState, label: &str) -> String {
    let machine = state
        .machines
        .create(MachineCreate {
            machine_id: label.to_string(),
            location: "test bay".to_string(),
            fixed_price: 25.0,
            gpios: vec![gpio(12, "pump"), gpio(13, "valve")],
        })
        .await
        .expect("create machine");
    machine.key()
}

async fn beat(state: &ServerState, label: &str) {
    let hb = HeartbeatRequest {
        machine_id: label.to_string(),
        firmware_version: None,
        ip_address: None,
        wifi_ssid: None,
        signal_strength: None,
    };
    state
        .machines
        .record_heartbeat(label, &hb, now_millis(), state.config.heartbeat_timeout_ms)
        .await
        .expect("record heartbeat")
        .expect("machine registered");
}

async fn create_sequence(state: &ServerState, name: &str, steps: Vec<(&str, f64, f64)>) -> String {
    let steps = steps
        .into_iter()
        .map(|(gpio_name, on_time, off_time)| SequenceStep {
            gpio_name: gpio_name.to_string(),
            on_time,
            off_time,
        })
        .collect();
    let sequence = state
        .sequences
        .create(
            SequenceCreate {
                name: name.to_string(),
                description: String::new(),
                steps,
                is_default: false,
            },
            None,
        )
        .await
        .expect("create sequence");
    sequence.key()
}

async fn pin_state(state: &ServerState, machine_key: &str, name: &str) -> GpioState {
    state
        .machines
        .find_by_key(machine_key)
        .await
        .expect("find machine")
        .expect("machine exists")
        .find_gpio(name)
        .expect("gpio exists")
        .current_state
}

async fn count_events(state: &ServerState, kind: EventKind) -> usize {
    let response = state
        .events
        .query(&EventQuery {
            kind: Some(kind),
            ..EventQuery::default()
        })
        .await
        .expect("query events");
    response.total
}

#[tokio::test]
async fn normal_run_drives_pins_in_order_and_unlocks() {
    let (state, _tasks) = setup(10_000).await;
    let machine_key = create_machine(&state, "VND-001").await;
    beat(&state, "VND-001").await;
    let seq_key = create_sequence(&state, "wash", vec![("pump", 0.3, 0.2), ("valve", 0.2, 0.0)]).await;

    state
        .engine
        .start_sequence(&machine_key, &seq_key, None)
        .await
        .expect("start");

    // 启动即返回：锁已持有、游标尚在序列推进中
    let machine = state.machines.find_by_key(&machine_key).await.unwrap().unwrap();
    assert!(machine.process_locked);
    assert!(machine.current_sequence.is_some());
    assert!(machine.process_start_time.is_some());
    assert!(lock_state_consistent(
        &machine,
        now_millis(),
        state.config.heartbeat_timeout_ms
    ));

    // t≈100ms：第 1 步 ON 相位
    sleep(Duration::from_millis(100)).await;
    assert_eq!(pin_state(&state, &machine_key, "pump").await, GpioState::On);
    let machine = state.machines.find_by_key(&machine_key).await.unwrap().unwrap();
    assert_eq!(machine.current_step, 1);

    // t≈600ms：第 1 步 off-delay 已过，第 2 步 ON 相位
    sleep(Duration::from_millis(500)).await;
    assert_eq!(pin_state(&state, &machine_key, "pump").await, GpioState::Off);
    assert_eq!(pin_state(&state, &machine_key, "valve").await, GpioState::On);
    let machine = state.machines.find_by_key(&machine_key).await.unwrap().unwrap();
    assert_eq!(machine.current_step, 2);

    // t≈1.1s：全部完成，锁释放、pin 归零
    sleep(Duration::from_millis(500)).await;
    let machine = state.machines.find_by_key(&machine_key).await.unwrap().unwrap();
    assert!(!machine.process_locked);
    assert!(machine.current_sequence.is_none());
    assert_eq!(machine.current_step, 0);
    assert!(machine.process_end_time.is_some());
    assert_eq!(pin_state(&state, &machine_key, "pump").await, GpioState::Off);
    assert_eq!(pin_state(&state, &machine_key, "valve").await, GpioState::Off);
    assert!(lock_state_consistent(
        &machine,
        now_millis(),
        state.config.heartbeat_timeout_ms
    ));

    assert_eq!(count_events(&state, EventKind::SequenceStart).await, 1);
    assert_eq!(count_events(&state, EventKind::SequenceEnd).await, 1);
}

#[tokio::test]
async fn second_start_reports_already_running_and_leaves_run_intact() {
    let (state, _tasks) = setup(10_000).await;
    let machine_key = create_machine(&state, "VND-002").await;
    beat(&state, "VND-002").await;
    let seq_key = create_sequence(&state, "long", vec![("pump", 2.0, 0.0)]).await;
    let other_key = create_sequence(&state, "other", vec![("valve", 0.1, 0.0)]).await;

    state
        .engine
        .start_sequence(&machine_key, &seq_key, None)
        .await
        .expect("first start");

    sleep(Duration::from_millis(100)).await;
    let err = state
        .engine
        .start_sequence(&machine_key, &other_key, None)
        .await
        .expect_err("second start must be rejected");
    assert!(matches!(err, relay_server::AppError::AlreadyRunning(_)));

    // 在途 run 不受影响：仍然锁着同一条序列
    let machine = state.machines.find_by_key(&machine_key).await.unwrap().unwrap();
    assert!(machine.process_locked);
    let seq_ref = machine.current_sequence.expect("sequence ref");
    assert_eq!(seq_ref.key().to_string(), seq_key);
    assert_eq!(count_events(&state, EventKind::SequenceStart).await, 1);
}

#[tokio::test]
async fn start_rejected_when_offline_or_unknown() {
    let (state, _tasks) = setup(10_000).await;
    let machine_key = create_machine(&state, "VND-003").await;
    let seq_key = create_sequence(&state, "wash", vec![("pump", 0.1, 0.0)]).await;

    // 没有任何心跳 → 离线
    let err = state
        .engine
        .start_sequence(&machine_key, &seq_key, None)
        .await
        .expect_err("offline machine must be rejected");
    assert!(matches!(err, relay_server::AppError::Offline(_)));

    let err = state
        .engine
        .start_sequence("nope", &seq_key, None)
        .await
        .expect_err("unknown machine");
    assert!(matches!(err, relay_server::AppError::NotFound(_)));

    beat(&state, "VND-003").await;
    let err = state
        .engine
        .start_sequence(&machine_key, "nope", None)
        .await
        .expect_err("unknown sequence");
    assert!(matches!(err, relay_server::AppError::NotFound(_)));
}

#[tokio::test]
async fn emergency_stop_on_idle_machine_is_idempotent_but_logged() {
    let (state, _tasks) = setup(10_000).await;
    let machine_key = create_machine(&state, "VND-004").await;
    beat(&state, "VND-004").await;

    state
        .engine
        .emergency_stop(&machine_key, "operator:7")
        .await
        .expect("stop on idle machine");

    let machine = state.machines.find_by_key(&machine_key).await.unwrap().unwrap();
    assert!(!machine.process_locked);
    assert_eq!(pin_state(&state, &machine_key, "pump").await, GpioState::Off);
    assert_eq!(pin_state(&state, &machine_key, "valve").await, GpioState::Off);

    sleep(Duration::from_millis(150)).await;
    assert_eq!(count_events(&state, EventKind::EmergencyStop).await, 1);

    // 防御性二次急停：状态不变，但照记事件
    state
        .engine
        .emergency_stop(&machine_key, "operator:7")
        .await
        .expect("second stop");
    sleep(Duration::from_millis(150)).await;
    assert_eq!(count_events(&state, EventKind::EmergencyStop).await, 2);
}

#[tokio::test]
async fn emergency_stop_preempts_inflight_run() {
    let (state, _tasks) = setup(10_000).await;
    let machine_key = create_machine(&state, "VND-005").await;
    beat(&state, "VND-005").await;
    let seq_key = create_sequence(&state, "wash", vec![("pump", 0.4, 0.0), ("valve", 0.4, 0.0)]).await;

    state
        .engine
        .start_sequence(&machine_key, &seq_key, None)
        .await
        .expect("start");

    sleep(Duration::from_millis(100)).await;
    assert_eq!(pin_state(&state, &machine_key, "pump").await, GpioState::On);

    state
        .engine
        .emergency_stop(&machine_key, "operator:1")
        .await
        .expect("emergency stop");

    let machine = state.machines.find_by_key(&machine_key).await.unwrap().unwrap();
    assert!(!machine.process_locked);
    assert_eq!(pin_state(&state, &machine_key, "pump").await, GpioState::Off);

    // 等过原本的 on_time：过期定时器醒来观察到前提失效，必须是 no-op
    sleep(Duration::from_millis(600)).await;
    assert_eq!(pin_state(&state, &machine_key, "pump").await, GpioState::Off);
    assert_eq!(pin_state(&state, &machine_key, "valve").await, GpioState::Off);
    let machine = state.machines.find_by_key(&machine_key).await.unwrap().unwrap();
    assert!(!machine.process_locked);
    assert_eq!(count_events(&state, EventKind::SequenceEnd).await, 0);
}

#[tokio::test]
async fn offline_at_step_boundary_interrupts_run() {
    // 心跳超时压到 200ms，启动后不再喂心跳
    let (state, _tasks) = setup(200).await;
    let machine_key = create_machine(&state, "VND-006").await;
    beat(&state, "VND-006").await;
    let seq_key = create_sequence(&state, "wash", vec![("pump", 0.3, 0.0), ("valve", 0.3, 0.0)]).await;

    state
        .engine
        .start_sequence(&machine_key, &seq_key, None)
        .await
        .expect("start");

    // 第 2 步的边界检查（t≈300ms）发现超时离线 → 中断并解锁
    sleep(Duration::from_millis(600)).await;
    let machine = state.machines.find_by_key(&machine_key).await.unwrap().unwrap();
    assert!(!machine.process_locked);
    assert!(machine.current_sequence.is_none());
    assert_eq!(pin_state(&state, &machine_key, "pump").await, GpioState::Off);
    assert_eq!(pin_state(&state, &machine_key, "valve").await, GpioState::Off);

    assert_eq!(count_events(&state, EventKind::SequenceInterrupted).await, 1);
    assert_eq!(count_events(&state, EventKind::SequenceEnd).await, 0);
}

#[tokio::test]
async fn reconnect_within_window_restarts_from_step_zero() {
    let (state, _tasks) = setup(10_000).await;
    let machine_key = create_machine(&state, "VND-007").await;
    beat(&state, "VND-007").await;
    let seq_key = create_sequence(&state, "wash", vec![("pump", 0.2, 0.0), ("valve", 0.2, 0.0)]).await;

    // 伪造中断现场：3 分钟前启动、卡在第 2 步、锁未释放
    let seq_ref = SequenceRepository::ref_string(&seq_key);
    let three_minutes_ago = now_millis() - 3 * 60 * 1000;
    state
        .machines
        .try_acquire_lock(&machine_key, &seq_ref, three_minutes_ago)
        .await
        .expect("acquire")
        .expect("lock taken");
    state.machines.set_step(&machine_key, 2).await.expect("set step");

    state
        .engine
        .restart_after_reconnect(&machine_key)
        .await
        .expect("reconnect restart");

    // 从第 0 步整体重跑：游标回到 1（而不是从 2 续跑）
    sleep(Duration::from_millis(100)).await;
    let machine = state.machines.find_by_key(&machine_key).await.unwrap().unwrap();
    assert!(machine.process_locked);
    assert_eq!(machine.current_step, 1);
    assert_eq!(pin_state(&state, &machine_key, "pump").await, GpioState::On);

    // 重跑会一路执行到正常完成
    sleep(Duration::from_millis(700)).await;
    let machine = state.machines.find_by_key(&machine_key).await.unwrap().unwrap();
    assert!(!machine.process_locked);
    assert_eq!(count_events(&state, EventKind::SequenceEnd).await, 1);
}

#[tokio::test]
async fn reconnect_past_stale_window_unlocks_without_retry() {
    let (state, _tasks) = setup(10_000).await;
    let machine_key = create_machine(&state, "VND-008").await;
    beat(&state, "VND-008").await;
    let seq_key = create_sequence(&state, "wash", vec![("pump", 0.2, 0.0)]).await;

    let seq_ref = SequenceRepository::ref_string(&seq_key);
    let fifteen_minutes_ago = now_millis() - 15 * 60 * 1000;
    state
        .machines
        .try_acquire_lock(&machine_key, &seq_ref, fifteen_minutes_ago)
        .await
        .expect("acquire")
        .expect("lock taken");
    state.machines.set_step(&machine_key, 1).await.expect("set step");

    state
        .engine
        .restart_after_reconnect(&machine_key)
        .await
        .expect("reconnect");

    sleep(Duration::from_millis(100)).await;
    let machine = state.machines.find_by_key(&machine_key).await.unwrap().unwrap();
    assert!(!machine.process_locked);
    assert!(machine.current_sequence.is_none());
    assert_eq!(machine.current_step, 0);
    assert!(!state.engine.has_active_run(&machine_key));
    assert_eq!(count_events(&state, EventKind::SequenceStart).await, 0);
}

#[tokio::test]
async fn reconnect_with_deleted_sequence_self_heals_to_idle() {
    let (state, _tasks) = setup(10_000).await;
    let machine_key = create_machine(&state, "VND-009").await;
    beat(&state, "VND-009").await;

    // current_sequence 指向不存在的序列
    state
        .machines
        .try_acquire_lock(&machine_key, "sequence:ghost", now_millis() - 60_000)
        .await
        .expect("acquire")
        .expect("lock taken");

    state
        .engine
        .restart_after_reconnect(&machine_key)
        .await
        .expect("reconnect");

    let machine = state.machines.find_by_key(&machine_key).await.unwrap().unwrap();
    assert!(!machine.process_locked);
    assert!(machine.current_sequence.is_none());
}

#[tokio::test]
async fn missing_pin_is_skipped_with_warning_not_hung() {
    let (state, _tasks) = setup(10_000).await;
    let machine_key = create_machine(&state, "VND-010").await;
    beat(&state, "VND-010").await;
    // 第 1 步引用不存在的 pin，第 2 步正常
    let seq_key = create_sequence(&state, "wash", vec![("ghost", 5.0, 5.0), ("pump", 0.2, 0.0)]).await;

    state
        .engine
        .start_sequence(&machine_key, &seq_key, None)
        .await
        .expect("start");

    // ghost 步被立刻跳过（不等它的 on/off 时长），pump 步照常执行并完成
    sleep(Duration::from_millis(600)).await;
    let machine = state.machines.find_by_key(&machine_key).await.unwrap().unwrap();
    assert!(!machine.process_locked);
    assert_eq!(count_events(&state, EventKind::SequenceEnd).await, 1);
    assert!(count_events(&state, EventKind::Warning).await >= 1);
}

#[tokio::test]
async fn orphaned_lock_is_released_on_startup_recovery() {
    let (state, _tasks) = setup(10_000).await;
    let machine_key = create_machine(&state, "VND-011").await;
    beat(&state, "VND-011").await;

    // 直接落一个"锁着但没有活体 task"的记录（模拟进程重启后的残留）
    state
        .machines
        .try_acquire_lock(&machine_key, "sequence:stale", now_millis())
        .await
        .expect("acquire")
        .expect("lock taken");
    assert!(!state.engine.has_active_run(&machine_key));

    let released = state
        .engine
        .release_orphaned_locks()
        .await
        .expect("recovery");
    assert_eq!(released, 1);

    let machine = state.machines.find_by_key(&machine_key).await.unwrap().unwrap();
    assert!(!machine.process_locked);
    assert!(machine.current_sequence.is_none());
}
