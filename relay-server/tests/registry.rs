//! 设备注册表与序列存储的不变量
//!
//! 直接打仓储层：锁 CAS、心跳跃迁判定、默认序列唯一性、删除保护。

use relay_server::core::{Config, ServerState};
use relay_server::db::models::{GpioConfig, GpioState, MachineCreate, SequenceCreate, SequenceStep};
use relay_server::db::repository::{RepoError, SequenceRepository};
use shared::request::HeartbeatRequest;
use shared::util::now_millis;

fn test_config() -> Config {
    Config {
        work_dir: "/tmp/relay-test".into(),
        http_port: 0,
        heartbeat_timeout_ms: 10_000,
        restart_stale_window_ms: 10 * 60 * 1000,
        webhook_secret: String::new(),
        environment: "development".into(),
        event_buffer_size: 64,
    }
}

async fn setup() -> ServerState {
    ServerState::initialize_in_memory(&test_config()).await
}

fn gpio(pin: u8, name: &str) -> GpioConfig {
    serde_json::from_value(serde_json::json!({
        "gpio_number": pin,
        "gpio_name": name,
    }))
    .expect("gpio config")
}

async fn create_machine(state: &ServerState, label: &str) -> String {
    state
        .machines
        .create(MachineCreate {
            machine_id: label.to_string(),
            location: "bay".to_string(),
            fixed_price: 10.0,
            gpios: vec![gpio(12, "pump")],
        })
        .await
        .expect("create machine")
        .key()
}

fn steps(defs: &[(&str, f64, f64)]) -> Vec<SequenceStep> {
    defs.iter()
        .map(|(name, on, off)| SequenceStep {
            gpio_name: name.to_string(),
            on_time: *on,
            off_time: *off,
        })
        .collect()
}

#[tokio::test]
async fn lock_acquisition_is_first_writer_wins() {
    let state = setup().await;
    let key = create_machine(&state, "VND-201").await;
    let now = now_millis();

    let first = state
        .machines
        .try_acquire_lock(&key, "sequence:a", now)
        .await
        .expect("first attempt");
    assert!(first.is_some(), "unlocked machine must be lockable");

    let second = state
        .machines
        .try_acquire_lock(&key, "sequence:b", now)
        .await
        .expect("second attempt");
    assert!(second.is_none(), "locked machine must refuse a second lock");

    // 输家没能改写任何 RUNNING 字段
    let machine = state.machines.find_by_key(&key).await.unwrap().unwrap();
    assert_eq!(
        machine.current_sequence.as_ref().map(|id| id.to_string()),
        Some("sequence:a".to_string())
    );
}

#[tokio::test]
async fn release_lock_zeroes_pins_and_stamps_end_time() {
    let state = setup().await;
    let key = create_machine(&state, "VND-202").await;
    let now = now_millis();

    state
        .machines
        .try_acquire_lock(&key, "sequence:a", now)
        .await
        .unwrap()
        .expect("locked");
    state
        .machines
        .set_gpio_state(&key, "pump", GpioState::On)
        .await
        .expect("pin on");
    state.machines.set_step(&key, 1).await.expect("step");

    let machine = state.machines.release_lock(&key, now).await.expect("release");
    assert!(!machine.process_locked);
    assert!(machine.current_sequence.is_none());
    assert_eq!(machine.current_step, 0);
    assert_eq!(machine.process_end_time, Some(now));
    assert!(
        machine
            .gpios
            .iter()
            .all(|g| g.current_state == GpioState::Off)
    );

    // 幂等：对已空闲机器再释放一次不报错、不改变 pin
    let machine = state
        .machines
        .release_lock(&key, now + 1)
        .await
        .expect("idempotent release");
    assert!(!machine.process_locked);
}

#[tokio::test]
async fn heartbeat_reports_reconnection_only_on_transition() {
    let state = setup().await;
    create_machine(&state, "VND-203").await;
    let hb = HeartbeatRequest {
        machine_id: "VND-203".into(),
        firmware_version: Some("v2.1.0".into()),
        ip_address: Some("10.0.0.9".into()),
        wifi_ssid: None,
        signal_strength: Some(-61),
    };
    let timeout = state.config.heartbeat_timeout_ms;

    // 第一次心跳：从未见过 → 跃迁
    let outcome = state
        .machines
        .record_heartbeat("VND-203", &hb, now_millis(), timeout)
        .await
        .expect("record")
        .expect("registered");
    assert!(outcome.came_online);
    assert_eq!(outcome.machine.firmware_version, "v2.1.0");
    assert_eq!(outcome.machine.signal_strength, Some(-61));

    // 紧接着的第二次：已在线 → 不是跃迁
    let outcome = state
        .machines
        .record_heartbeat("VND-203", &hb, now_millis(), timeout)
        .await
        .expect("record")
        .expect("registered");
    assert!(!outcome.came_online);

    // 超时后的心跳：又是跃迁（用人为拉开的 now 模拟时间流逝）
    let later = now_millis() + timeout + 1_000;
    let outcome = state
        .machines
        .record_heartbeat("VND-203", &hb, later, timeout)
        .await
        .expect("record")
        .expect("registered");
    assert!(outcome.came_online);
}

#[tokio::test]
async fn pending_restart_is_delivered_once() {
    let state = setup().await;
    let key = create_machine(&state, "VND-204").await;
    state
        .machines
        .set_pending_restart(&key)
        .await
        .expect("queue restart");

    let hb = HeartbeatRequest {
        machine_id: "VND-204".into(),
        firmware_version: None,
        ip_address: None,
        wifi_ssid: None,
        signal_strength: None,
    };
    let timeout = state.config.heartbeat_timeout_ms;

    let outcome = state
        .machines
        .record_heartbeat("VND-204", &hb, now_millis(), timeout)
        .await
        .unwrap()
        .unwrap();
    assert!(outcome.pending_restart, "flag rides along on the heartbeat");

    let outcome = state
        .machines
        .record_heartbeat("VND-204", &hb, now_millis(), timeout)
        .await
        .unwrap()
        .unwrap();
    assert!(!outcome.pending_restart, "flag is consumed on delivery");
}

#[tokio::test]
async fn machine_delete_refused_while_locked() {
    let state = setup().await;
    let key = create_machine(&state, "VND-205").await;
    state
        .machines
        .try_acquire_lock(&key, "sequence:a", now_millis())
        .await
        .unwrap()
        .expect("locked");

    let err = state.machines.delete(&key).await.expect_err("must refuse");
    assert!(matches!(err, RepoError::Locked(_)));

    state.machines.release_lock(&key, now_millis()).await.expect("release");
    assert!(state.machines.delete(&key).await.expect("delete after unlock"));
}

#[tokio::test]
async fn gpio_config_rejects_invalid_pins_and_duplicates() {
    let state = setup().await;
    let key = create_machine(&state, "VND-206").await;

    let err = state
        .machines
        .update_gpio_config(&key, vec![gpio(3, "bad-pin")])
        .await
        .expect_err("pin 3 is not wirable");
    assert!(matches!(err, RepoError::Validation(_)));

    let err = state
        .machines
        .update_gpio_config(&key, vec![gpio(12, "pump"), gpio(13, "pump")])
        .await
        .expect_err("duplicate logical name");
    assert!(matches!(err, RepoError::Validation(_)));

    let machine = state
        .machines
        .update_gpio_config(&key, vec![gpio(12, "pump"), gpio(13, "valve")])
        .await
        .expect("valid config");
    assert_eq!(machine.gpios.len(), 2);
}

#[tokio::test]
async fn default_flag_moves_atomically_between_sequences() {
    let state = setup().await;
    let a = state
        .sequences
        .create(
            SequenceCreate {
                name: "a".into(),
                description: String::new(),
                steps: steps(&[("pump", 1.0, 0.0)]),
                is_default: true,
            },
            None,
        )
        .await
        .expect("create a");
    let b = state
        .sequences
        .create(
            SequenceCreate {
                name: "b".into(),
                description: String::new(),
                steps: steps(&[("pump", 2.0, 0.5)]),
                is_default: true,
            },
            None,
        )
        .await
        .expect("create b");

    let defaults: Vec<_> = state
        .sequences
        .find_all()
        .await
        .expect("list")
        .into_iter()
        .filter(|s| s.is_default)
        .collect();
    assert_eq!(defaults.len(), 1);
    assert_eq!(defaults[0].key(), b.key());

    // a 的标记已被 b 夺走
    let a = state
        .sequences
        .find_by_key(&a.key())
        .await
        .expect("query")
        .expect("a exists");
    assert!(!a.is_default);

    let found = state.sequences.find_default().await.expect("query").expect("default");
    assert_eq!(found.key(), b.key());
}

#[tokio::test]
async fn total_duration_is_never_caller_settable() {
    let state = setup().await;
    let seq = state
        .sequences
        .create(
            SequenceCreate {
                name: "wash".into(),
                description: String::new(),
                steps: steps(&[("pump", 2.0, 1.0), ("valve", 1.0, 0.0)]),
                is_default: false,
            },
            None,
        )
        .await
        .expect("create");
    assert_eq!(seq.total_duration, 4.0);

    let updated = state
        .sequences
        .update(
            &seq.key(),
            relay_server::db::models::SequenceUpdate {
                name: None,
                description: None,
                steps: Some(steps(&[("pump", 0.5, 0.5)])),
                is_default: None,
            },
        )
        .await
        .expect("update");
    assert_eq!(updated.total_duration, 1.0);
}

#[tokio::test]
async fn empty_or_negative_steps_are_rejected() {
    let state = setup().await;

    let err = state
        .sequences
        .create(
            SequenceCreate {
                name: "empty".into(),
                description: String::new(),
                steps: vec![],
                is_default: false,
            },
            None,
        )
        .await
        .expect_err("no steps");
    assert!(matches!(err, RepoError::Validation(_)));

    let err = state
        .sequences
        .create(
            SequenceCreate {
                name: "negative".into(),
                description: String::new(),
                steps: steps(&[("pump", -1.0, 0.0)]),
                is_default: false,
            },
            None,
        )
        .await
        .expect_err("negative on_time");
    assert!(matches!(err, RepoError::Validation(_)));
}

#[tokio::test]
async fn sequence_delete_refused_while_referenced() {
    let state = setup().await;
    let machine_key = create_machine(&state, "VND-207").await;
    let seq = state
        .sequences
        .create(
            SequenceCreate {
                name: "wash".into(),
                description: String::new(),
                steps: steps(&[("pump", 1.0, 0.0)]),
                is_default: false,
            },
            None,
        )
        .await
        .expect("create");

    let seq_ref = SequenceRepository::ref_string(&seq.key());
    state
        .machines
        .try_acquire_lock(&machine_key, &seq_ref, now_millis())
        .await
        .unwrap()
        .expect("locked");

    let referencing = state
        .machines
        .count_referencing_sequence(&seq_ref)
        .await
        .expect("count");
    assert_eq!(referencing, 1);

    let err = state
        .sequences
        .delete(&seq.key(), referencing)
        .await
        .expect_err("must refuse while referenced");
    assert!(matches!(err, RepoError::Locked(_)));

    state
        .machines
        .release_lock(&machine_key, now_millis())
        .await
        .expect("release");
    let referencing = state
        .machines
        .count_referencing_sequence(&seq_ref)
        .await
        .expect("count");
    assert_eq!(referencing, 0);
    state
        .sequences
        .delete(&seq.key(), referencing)
        .await
        .expect("delete after release");
}
