// SPDX-FileCopyrightText: 2023 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use std::path::PathBuf;

use clap::Parser;
use tracing::error;

use gbotserver::{configurations, telemetry::{get_subscriber, init_subscriber}};

/// Group-message assistant bot.
#[derive(Debug, Parser)]
#[command(name = "gbotserver")]
struct Args {
    /// Path to the ini configuration file.
    #[arg(long)]
    config: PathBuf,
}

fn parse_args() -> Args {
    match Args::try_parse() {
        Ok(args) => args,
        Err(error)
            if matches!(
                error.kind(),
                clap::error::ErrorKind::DisplayHelp | clap::error::ErrorKind::DisplayVersion
            ) =>
        {
            print!("{error}");
            std::process::exit(0);
        }
        Err(error) => {
            eprint!("{error}");
            std::process::exit(1);
        }
    }
}

#[tokio::main]
async fn main() {
    let args = parse_args();

    let subscriber = get_subscriber("gbotserver".into(), "info".into(), std::io::stdout);
    init_subscriber(subscriber);

    let settings = match configurations::get_configuration(&args.config) {
        Ok(settings) => settings,
        Err(error) => {
            error!(%error, "failed to load configuration");
            std::process::exit(1);
        }
    };

    if let Err(error) = gbotserver::run(settings).await {
        error!(%error, "engine exited with an error");
        std::process::exit(1);
    }
}
