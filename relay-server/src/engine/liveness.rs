//! 存活判定
//!
//! 设备没有常驻连接，在线与否只能从"距上次心跳多久"惰性推导。
//! 没有后台轮询线程：所有判定都在读取时刻发生，唯一的状态就是
//! 机器记录里的 `last_heartbeat` 时间戳。

/// 在线 = 有过心跳，且距今不超过 `timeout_ms`
pub fn is_online(last_heartbeat: Option<i64>, now: i64, timeout_ms: i64) -> bool {
    match last_heartbeat {
        Some(last) => now - last < timeout_ms,
        None => false,
    }
}

/// 判定"这次心跳是否构成 离线→在线 跃迁"
///
/// 必须用覆盖前的旧时间戳判定 — 先判定，再落账新心跳。
/// 跃迁信号是重连和解（restart-after-reconnect）的触发器。
pub fn marks_reconnection(prior_heartbeat: Option<i64>, now: i64, timeout_ms: i64) -> bool {
    !is_online(prior_heartbeat, now, timeout_ms)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIMEOUT: i64 = 10_000;

    #[test]
    fn no_heartbeat_means_offline() {
        assert!(!is_online(None, 1_000_000, TIMEOUT));
    }

    #[test]
    fn recent_heartbeat_means_online() {
        assert!(is_online(Some(100_000), 100_001, TIMEOUT));
        assert!(is_online(Some(100_000), 109_999, TIMEOUT));
    }

    #[test]
    fn boundary_is_exclusive() {
        // 恰好等于超时视为离线
        assert!(!is_online(Some(100_000), 110_000, TIMEOUT));
    }

    #[test]
    fn first_ever_heartbeat_is_a_reconnection() {
        assert!(marks_reconnection(None, 100_000, TIMEOUT));
    }

    #[test]
    fn heartbeat_within_window_is_not_a_reconnection() {
        assert!(!marks_reconnection(Some(95_000), 100_000, TIMEOUT));
    }

    #[test]
    fn heartbeat_after_gap_is_a_reconnection() {
        assert!(marks_reconnection(Some(50_000), 100_000, TIMEOUT));
    }
}
