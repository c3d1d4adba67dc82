// SPDX-FileCopyrightText: 2023 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Process bootstrap for the group-message assistant bot: wires a
//! SQLite-backed [`gbotbackend::Engine`] from [`configurations::Settings`]
//! and runs its background workers until they exit.

pub mod collaborators;
pub mod configurations;
pub mod telemetry;

use std::{sync::Arc, time::Duration};

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use gbotbackend::{
    distributor::SqliteInboxStorage, footprint::Footprint, group_keys::SqliteGroupKeyStorage, settings::Settings,
    Engine,
};
use gbotcommon::messages::Request;

use collaborators::{StubFacebook, StubMessenger, StubUsher};

/// How often the distributor drains woken-up receivers.
const DISTRIBUTOR_TICK: Duration = Duration::from_secs(5);
/// How often the footprint's identity-document secondary pass runs.
const FACEBOOK_REFRESH: Duration = Duration::from_secs(600);

pub type BotEngine = Engine<SqliteGroupKeyStorage, StubFacebook, SqliteInboxStorage, StubMessenger, StubUsher>;

/// Build the engine described by `settings` and run its background
/// workers to completion (in practice, forever - the workers only return
/// once their queue's sender side is dropped, which doesn't happen while
/// the returned [`Engine`] is alive).
pub async fn run(settings: Settings) -> Result<(), sqlx::Error> {
    let connect_options = SqliteConnectOptions::new()
        .filename(&settings.database.path)
        .create_if_missing(true);
    let pool = SqlitePoolOptions::new().connect_with(connect_options).await?;
    SqliteGroupKeyStorage::migrate(&pool).await?;
    SqliteInboxStorage::migrate(&pool).await?;

    let footprint = Arc::new(Footprint::load(&settings.database.active_users_path).unwrap_or_else(|error| {
        warn!(%error, "no usable active-users snapshot on disk, starting empty");
        Footprint::new(&settings.database.active_users_path)
    }));

    let engine = Arc::new(BotEngine::new(
        footprint,
        SqliteGroupKeyStorage::new(pool.clone()),
        SqliteInboxStorage::new(pool),
        Arc::new(StubFacebook),
        Arc::new(StubMessenger),
        Arc::new(StubUsher),
    ));

    info!(
        host = %settings.station.host,
        port = settings.station.port,
        "starting group-message assistant engine"
    );

    let mut workers = engine.spawn_background_workers(DISTRIBUTOR_TICK, FACEBOOK_REFRESH);
    workers.push(tokio::spawn(ingest_stdin(engine)));
    for worker in workers {
        let _ = worker.await;
    }
    Ok(())
}

/// Reads one JSON-encoded [`Request`] per line from stdin and hands each to
/// [`gbotbackend::Engine::ingest`]. Stands in for the station's actual
/// transport session, which out-of-scope collaborators like
/// [`StubMessenger`] otherwise have nowhere to receive from.
async fn ingest_stdin(engine: Arc<BotEngine>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => return,
            Err(error) => {
                warn!(%error, "stdin ingest read failed");
                return;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<Request>(&line) {
            Ok(request) => engine.ingest(request).await,
            Err(error) => warn!(%error, "dropping unparseable ingest line"),
        }
    }
}
