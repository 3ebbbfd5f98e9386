//! Race lifecycle trigger: selecting -> racing

use tracing::{info, warn};

use super::graphql::{ApiError, Race, RaceApi};
use super::SyncClient;

/// Why a race could not be launched
#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    #[error("Two rockets must be selected, {0} selected")]
    IncompleteSelection(usize),

    #[error("Failed to start race: {0}")]
    Api(#[from] ApiError),
}

/// Start a race for the client's selection and announce it to the relay.
///
/// The launch is only announced once the API has accepted the race; a failed
/// start sends nothing. The two steps are not transactional: an announced
/// launch is never taken back.
pub async fn launch_race(client: &mut SyncClient, api: &RaceApi) -> Result<Race, LaunchError> {
    let (rocket1, rocket2) = match client.selection().pair() {
        Some((first, second)) => (first.to_string(), second.to_string()),
        None => return Err(LaunchError::IncompleteSelection(client.selection().len())),
    };

    let race = api.start_race(&rocket1, &rocket2).await.map_err(|e| {
        warn!(error = %e, rocket1 = %rocket1, rocket2 = %rocket2, "Race start failed");
        e
    })?;

    info!(race_id = %race.id, rocket1 = %rocket1, rocket2 = %rocket2, "Race started");
    client.announce_launch();

    Ok(race)
}
