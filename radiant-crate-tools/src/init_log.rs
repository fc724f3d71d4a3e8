use std::io::Write;

/// 进程级日志初始化
///
/// 默认过滤级别为 Info，可以通过 `RUST_LOG` 覆盖，例如 `RUST_LOG=radiant_gfx=debug`
pub fn init_log() {
    formatted_builder().init();
}

/// 测试中使用，可以重复调用；输出交给 test harness 捕获
pub fn init_test_log() {
    let _ = formatted_builder().is_test(true).try_init();
}

fn formatted_builder() -> env_logger::Builder {
    let mut builder = env_logger::Builder::new();
    builder
        .format(|buf, record| {
            let info_style = buf
                .default_level_style(log::Level::Info)
                .fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Green)));
            let warn_style = buf
                .default_level_style(log::Level::Warn)
                .fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Yellow)));
            let error_style = buf
                .default_level_style(log::Level::Error)
                .fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Red)));

            let level_style = match record.level() {
                log::Level::Info => info_style,
                log::Level::Warn => warn_style,
                log::Level::Error => error_style,
                _ => buf.default_level_style(record.level()),
            };
            let path_style = info_style.fg_color(Some(anstyle::Color::Rgb(anstyle::RgbColor(110, 110, 110))));
            let msg_style = info_style.fg_color(Some(anstyle::Color::Rgb(anstyle::RgbColor(75, 75, 75))));

            // windows 下的路径分隔符同样需要处理
            let file = record.file().unwrap_or("").rsplit(['/', '\\']).next().unwrap_or("");
            let line = record.line().unwrap_or(!0);
            let time = chrono::Local::now().format("%H:%M:%S");
            let level = record.level();

            writeln!(
                buf,
                "{level_style}[{time}] {level}{level_style:#} {path_style}[{file}:{line}]{path_style:#} \
                 {msg_style}{}{msg_style:#}",
                record.args()
            )
        })
        .filter(None, log::LevelFilter::Info)
        // 放在最后，让环境变量覆盖默认级别
        .parse_default_env();
    builder
}
