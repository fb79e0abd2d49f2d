use std::io::Write;

use chrono::Local;
use log::LevelFilter;

/// 初始化全局日志, 默认 Info 级别
///
/// 幂等: 重复调用(例如多个测试)不会 panic。
pub fn init() {
    init_with_level(LevelFilter::Info);
}

pub fn init_with_level(level: LevelFilter) {
    let _ = env_logger::Builder::new()
        .filter_level(level)
        .format(|buf, record| {
            writeln!(
                buf,
                "{} [{}] - {}",
                Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                record.args()
            )
        })
        .try_init();
}
