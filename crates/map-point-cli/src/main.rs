use clap::Parser;

mod commands;
mod logging;
mod settings;

use settings::Settings;

fn main() -> std::process::ExitCode {
    let settings = Settings::parse();
    logging::setup_logging();

    let result = {
        #[cfg(feature = "profiling")]
        profiling::scope!("map_point::run");
        commands::run(&settings)
    };
    #[cfg(feature = "profiling")]
    profiling::finish_frame!();

    match result {
        Ok(output) => {
            println!("{}", output.trim_end());
            std::process::ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!("{}", e);
            eprintln!("error: {e}");
            std::process::ExitCode::FAILURE
        }
    }
}
