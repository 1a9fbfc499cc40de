// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

use tokio::select;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tower::BoxError;
use tracing::{debug, info, warn};

use crate::codecs::CodecRegistry;
use crate::config::{AgentConfig, FileGroup};
use crate::init::wait;
use crate::registrar::{FileStateTable, Registrar, RegistrarHandle};

/// Extra time allowed on top of the registrar's shutdown timeout for its
/// final persist.
const FINAL_PERSIST_GRACE: Duration = Duration::from_secs(5);

/// The running agent: validated file groups plus the registrar.
///
/// Tailing workers are handed a [`RegistrarHandle`] and the resume point for
/// their stream, then build a codec from their group's factory.
pub struct Agent {
    config: AgentConfig,
    file_groups: Vec<FileGroup>,
    registrar: Registrar,
    handle: RegistrarHandle,
    exit_grace: Duration,
}

impl Agent {
    /// Validate the configuration and load the registrar snapshot. Fails on
    /// any configuration error, before anything starts running.
    pub fn new(config: AgentConfig, registry: &CodecRegistry) -> Result<Self, BoxError> {
        let file_groups = config.build_file_groups(registry)?;
        let (registrar, handle) = Registrar::new(config.general.registrar_config());

        Ok(Self {
            config,
            file_groups,
            registrar,
            handle,
            exit_grace: FINAL_PERSIST_GRACE,
        })
    }

    pub fn with_exit_grace(mut self, exit_grace: Duration) -> Self {
        self.exit_grace = exit_grace;
        self
    }

    pub fn file_groups(&self) -> &[FileGroup] {
        &self.file_groups
    }

    pub fn resume_points(&self) -> FileStateTable {
        self.registrar.resume_points()
    }

    /// Handle for a worker. Workers must drop it once they have submitted
    /// their final events.
    pub fn registrar_handle(&self) -> RegistrarHandle {
        self.handle.clone()
    }

    pub async fn run(self, cancel: CancellationToken) -> Result<(), BoxError> {
        let Agent {
            config,
            file_groups,
            registrar,
            handle,
            exit_grace,
        } = self;

        info!(
            file_groups = file_groups.len(),
            resume_points = registrar.resume_points().len(),
            "Starting agent"
        );
        for (i, group) in file_groups.iter().enumerate() {
            debug!(group = i, paths = ?group.paths, codec = group.codec.name(), "File group");
        }

        let mut tasks: JoinSet<Result<(), BoxError>> = JoinSet::new();
        {
            let token = cancel.clone();
            tasks.spawn(async move {
                let table = registrar.run(token).await?;
                debug!(files = table.len(), "Registrar exited");
                Ok(())
            });
        }

        select! {
            _ = cancel.cancelled() => {
                debug!("Agent cancelled");
            }
            e = wait::wait_for_any_task(&mut tasks) => {
                match e {
                    Ok(()) => warn!("Unexpected early exit of registrar."),
                    Err(e) => return Err(e),
                }
            }
        }

        // The registrar drains until every handle is gone
        drop(handle);

        wait::wait_for_tasks_with_timeout(
            &mut tasks,
            config.general.shutdown_timeout + exit_grace,
        )
        .await
    }
}
