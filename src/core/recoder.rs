use log4rs::{
    append::{
        console::{ConsoleAppender, Target},
        file::FileAppender,
    },
    config::{Appender, Config, Root},
    encode::pattern::PatternEncoder,
    filter::threshold::ThresholdFilter,
};
use std::path::PathBuf;

/// `<recoder_home>/<name>/<split>-<timestamp>.log`
pub fn log_file_path(learner: &crate::core::parser::Learner) -> PathBuf {
    let stamp = chrono::Local::now().format("%Y%m-%d--%H:%M:%S");
    learner
        .run_dir()
        .join(format!("{}-{}.log", learner.split, stamp))
}

/// Full trace goes to the run's log file; stderr is cut at `--log-level`.
pub fn build_log_config(learner: &crate::core::parser::Learner) -> anyhow::Result<log4rs::Config> {
    std::fs::create_dir_all(learner.run_dir())?;
    let log_path = log_file_path(learner);

    let stderr = ConsoleAppender::builder()
        .target(Target::Stderr)
        .encoder(Box::new(PatternEncoder::new("{h({l})} {m}{n}")))
        .build();
    let logfile = FileAppender::builder()
        .encoder(Box::new(PatternEncoder::new(
            "{d(%+)(utc)} [{f}:{L}] {h({l})} -> {m}{n}",
        )))
        .build(&log_path)?;

    let config = Config::builder()
        .appender(Appender::builder().build("logfile", Box::new(logfile)))
        .appender(
            Appender::builder()
                .filter(Box::new(ThresholdFilter::new(learner.log_level)))
                .build("stderr", Box::new(stderr)),
        )
        .build(
            Root::builder()
                .appender("logfile")
                .appender("stderr")
                .build(log::LevelFilter::Trace),
        )?;

    Ok(config)
}
