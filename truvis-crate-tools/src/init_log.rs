use std::io::Write;

/// 初始化全局日志，默认等级为 Info
pub fn init_log() {
    init_log_with_level(log::LevelFilter::Info);
}

pub fn init_log_with_level(level: log::LevelFilter) {
    styled_builder(level).init();
}

/// 测试中使用：输出交给 test harness 捕获，重复调用不会 panic
pub fn init_test_log() {
    let _ = styled_builder(log::LevelFilter::Debug).is_test(true).try_init();
}

fn styled_builder(level: log::LevelFilter) -> env_logger::Builder {
    let mut builder = env_logger::Builder::new();
    builder
        .format(|buf, record| {
            let info_style = buf
                .default_level_style(log::Level::Info)
                .fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Green)));
            let level_style = match record.level() {
                log::Level::Info => info_style,
                log::Level::Warn => buf
                    .default_level_style(log::Level::Warn)
                    .fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Yellow))),
                log::Level::Error => buf
                    .default_level_style(log::Level::Error)
                    .fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Red))),
                _ => buf.default_level_style(record.level()),
            };
            let grey_style = info_style.fg_color(Some(anstyle::Color::Rgb(anstyle::RgbColor(110, 110, 110))));
            let text_style = info_style.fg_color(Some(anstyle::Color::Rgb(anstyle::RgbColor(75, 75, 75))));

            let line = record.line().unwrap_or(!0);
            // 兼容 windows 与 unix 的路径分隔符
            let file = record.file().unwrap_or("").rsplit(['/', '\\']).next().unwrap_or("");
            let time = chrono::Local::now().format("%H:%M:%S");
            let level = record.level();

            writeln!(
                buf,
                "{level_style}[{time}] {level}{level_style:#} {grey_style}[{file}:{line}]{grey_style:#} \
                 {text_style}{}{text_style:#}",
                record.args()
            )
        })
        .filter(None, level);
    builder
}
