/// Initializes the logging system from the default file `log4rs.yaml` in the
/// working directory. Prefer [`init_for_repo_in`] for programmatic control.
pub fn init() -> Result<(), Box<dyn std::error::Error>> {
    let _ = log4rs::init_file("log4rs.yaml", log4rs::config::Deserializers::default());
    Ok(())
}

/// Initializes logging to a repository-scoped folder:
/// `{base}/{repo_name}_logs/{repo_name}.log`.
///
/// # Errors
/// Returns an error if the directory cannot be created or the logger fails
/// to initialize. A second initialization in the same process is a no-op.
pub fn init_for_repo_in(
    base_dir: &std::path::Path,
    repo_name: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    use log::LevelFilter;
    use log4rs::append::file::FileAppender;
    use log4rs::config::{Appender, Config, Root};
    use log4rs::encode::pattern::PatternEncoder;

    let dir = base_dir.join(format!("{repo_name}_logs"));
    std::fs::create_dir_all(&dir)?;
    let logfile = dir.join(format!("{repo_name}.log"));
    let encoder = Box::new(PatternEncoder::new("{d(%Y-%m-%d %H:%M:%S%.3f)} [{l}] {t} - {m}{n}"));
    let file_appender = FileAppender::builder().encoder(encoder).build(logfile)?;
    let config = Config::builder()
        .appender(Appender::builder().build("file", Box::new(file_appender)))
        .build(Root::builder().appender("file").build(LevelFilter::Info))?;
    // Ignore AlreadyInitialized: tests open several repositories per process.
    let _ = log4rs::init_config(config);
    Ok(())
}
