use nested_compositor::{backend::drm, config::Config, host::LoggingHost};
use tracing_subscriber::{prelude::*, reload, EnvFilter};

static USAGE: &[&str] = &[
    "--run : Present the embedding client on the DRM output (default).",
    "--probe : Print the connector, CRTC and mode that would be used, then exit.",
];

fn main() -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env();
    let from_env = env_filter.is_ok();
    let (filter, filter_handle) =
        reload::Layer::new(env_filter.unwrap_or_else(|_| EnvFilter::new("info")));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().compact())
        .init();

    // The config file can only be read once logging is up, so its filter is
    // applied afterwards.
    if !from_env {
        let log_filter = Config::with(|config| config.log_filter.clone());
        match EnvFilter::try_new(&log_filter) {
            Ok(filter) => {
                if let Err(err) = filter_handle.reload(filter) {
                    tracing::warn!("Failed to apply log filter: {err}");
                }
            }
            Err(err) => tracing::warn!("Invalid log filter {log_filter:?}: {err}"),
        }
    }

    #[cfg(feature = "profile-with-tracy")]
    profiling::tracy_client::Client::start();

    profiling::register_thread!("Main Thread");

    let arg = ::std::env::args().nth(1);
    match arg.as_ref().map(|s| &s[..]) {
        None | Some("--run") => {
            tracing::info!("Starting nested compositor");
            let mut host = LoggingHost::default();
            Config::with(|config| nested_compositor::run(config, &mut host))
        }
        Some("--probe") => {
            tracing::info!("Probing DRM output");
            let render_card = Config::with(|config| config.render_card.clone());
            let discovery = drm::discover(&render_card)?;
            let (width, height) = discovery.size();
            #[allow(clippy::disallowed_macros)]
            {
                println!("device: {}", discovery.path().display());
                println!("connector: {:?}", discovery.connector());
                println!("crtc: {:?}", discovery.crtc());
                println!("mode: {}x{} ({:?})", width, height, discovery.mode().name());
            }
            Ok(())
        }
        Some(other) => {
            tracing::error!("Unknown argument: {}", other);
            #[allow(clippy::disallowed_macros)]
            {
                println!("USAGE: nested-compositor [option]");
                println!();
                println!("Possible options are:");
                for option in USAGE {
                    println!("\t{}", option);
                }
            }
            Ok(())
        }
    }
}
