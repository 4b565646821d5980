use appforge_lib::config::AppConfig;

fn main() {
    let config = match AppConfig::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("appforge: {e}");
            std::process::exit(2);
        }
    };

    // Initialize Sentry before anything else so panics during startup are captured.
    // Returns a no-op guard when no DSN is configured (local dev).
    let _sentry_guard = sentry::init(sentry_options(config.sentry_dsn.as_deref()));

    if let Err(e) = appforge_lib::run(config) {
        tracing::error!(error = %e, "AppForge exited with an error");
        eprintln!("appforge: {e}");
        std::process::exit(1);
    }
}

fn sentry_options(dsn: Option<&str>) -> sentry::ClientOptions {
    let dsn = dsn.or(option_env!("SENTRY_DSN")).filter(|s| !s.trim().is_empty());
    sentry::ClientOptions {
        dsn: dsn.and_then(|s| s.parse().ok()),
        release: Some(env!("CARGO_PKG_VERSION").into()),
        traces_sample_rate: 0.0,
        send_default_pii: false,
        before_send: Some(std::sync::Arc::new(|mut event| {
            if let Some(ref mut user) = event.user {
                user.email = None;
                user.ip_address = None;
                user.username = None;
            }
            // Request bodies carry prompts and generated code
            if let Some(ref mut request) = event.request {
                request.data = None;
            }
            Some(event)
        })),
        ..Default::default()
    }
}
