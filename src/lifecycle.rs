//! Partition provisioning, version pruning and teardown.
//!
//! | State | Meaning |
//! |-------|---------|
//! | Uninstalled | Nothing provisioned for this generation yet |
//! | Installing | Configuration validated, partitions being opened |
//! | Active | Partitions exist, routers may be created |
//! | Retiring | Shutdown in progress |
//! | Removed | Shut down; `install` may start over |

use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::cache::{parse_version, CacheStore, Partition};
use crate::config::Config;
use crate::error::LifecycleError;
use crate::router::Router;
use crate::transport::Transport;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
  Uninstalled,
  Installing,
  Active,
  Retiring,
  Removed,
}

impl fmt::Display for LifecycleState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(match self {
      Self::Uninstalled => "uninstalled",
      Self::Installing => "installing",
      Self::Active => "active",
      Self::Retiring => "retiring",
      Self::Removed => "removed",
    })
  }
}

/// Outcome of [`Lifecycle::activate`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ActivationReport {
  /// Superseded partitions that were deleted
  pub pruned: Vec<String>,
  /// Superseded partitions whose deletion failed (retried on the next activate)
  pub failed: Vec<String>,
}

pub struct Lifecycle<S> {
  config: Arc<Config>,
  store: Arc<S>,
  state: LifecycleState,
}

impl<S: CacheStore + 'static> Lifecycle<S> {
  pub fn new(config: Arc<Config>, store: Arc<S>) -> Self {
    Self {
      config,
      store,
      state: LifecycleState::Uninstalled,
    }
  }

  pub fn state(&self) -> LifecycleState {
    self.state
  }

  pub fn generation(&self) -> u64 {
    self.config.generation
  }

  /// Partitions the configuration names for the current generation.
  pub fn partitions(&self) -> Vec<Partition> {
    self
      .config
      .strategies
      .iter()
      .map(|strategy| strategy.partition_name.as_str())
      .collect::<BTreeSet<_>>()
      .into_iter()
      .map(|base| Partition::versioned(base, self.config.generation))
      .collect()
  }

  /// Validate the configuration and open every partition for this generation.
  ///
  /// A no-op when already active.
  pub fn install(&mut self) -> Result<(), LifecycleError> {
    match self.state {
      LifecycleState::Active => {
        debug!(generation = self.generation(), "already installed");
        return Ok(());
      }
      LifecycleState::Installing | LifecycleState::Retiring => {
        return Err(LifecycleError::InvalidTransition {
          action: "install",
          state: self.state,
        });
      }
      LifecycleState::Uninstalled | LifecycleState::Removed => {}
    }

    self.config.validate()?;
    self.state = LifecycleState::Installing;

    for partition in self.partitions() {
      if let Err(source) = self.store.open(partition.name()) {
        self.state = LifecycleState::Uninstalled;
        return Err(LifecycleError::Provision {
          name: partition.name().to_string(),
          source,
        });
      }
      debug!(partition = partition.name(), "partition ready");
    }

    self.state = LifecycleState::Active;
    info!(generation = self.generation(), "installed");
    Ok(())
  }

  /// Take over as the current generation: install if needed, then delete every
  /// partition tagged with an older generation. Deletion failures are logged and
  /// skipped.
  pub fn activate(&mut self) -> Result<ActivationReport, LifecycleError> {
    if self.state != LifecycleState::Active {
      self.install()?;
    }

    let generation = self.generation();
    let mut report = ActivationReport::default();

    let names = match self.store.list_partitions() {
      Ok(names) => names,
      Err(e) => {
        warn!(error = %e, "could not list partitions, skipping cleanup");
        Vec::new()
      }
    };

    for name in names {
      match parse_version(&name) {
        Some(version) if version < generation => match self.store.delete_partition(&name) {
          Ok(_) => {
            info!(partition = name.as_str(), "pruned superseded partition");
            report.pruned.push(name);
          }
          Err(e) => {
            warn!(partition = name.as_str(), error = %e, "failed to prune partition");
            report.failed.push(name);
          }
        },
        Some(_) => {}
        None => debug!(partition = name.as_str(), "unversioned partition left alone"),
      }
    }

    self.state = LifecycleState::Active;
    Ok(report)
  }

  /// Shut down. With `reset`, the current generation's partitions are deleted too;
  /// otherwise they persist until a newer generation activates.
  pub fn retire(&mut self, reset: bool) -> Result<Vec<String>, LifecycleError> {
    if self.state != LifecycleState::Active {
      return Err(LifecycleError::InvalidTransition {
        action: "retire",
        state: self.state,
      });
    }

    self.state = LifecycleState::Retiring;
    let mut removed = Vec::new();

    if reset {
      for partition in self.partitions() {
        match self.store.delete_partition(partition.name()) {
          Ok(true) => removed.push(partition.name().to_string()),
          Ok(false) => {}
          Err(e) => warn!(partition = partition.name(), error = %e, "failed to delete partition"),
        }
      }
    }

    self.state = LifecycleState::Removed;
    info!(generation = self.generation(), reset, "retired");
    Ok(removed)
  }

  /// Delete expired entries from every partition that has a max age.
  pub fn sweep(&self) -> Result<usize, LifecycleError> {
    self.require_active("sweep")?;

    let mut removed = 0;
    for strategy in &self.config.strategies {
      let Some(max_age) = strategy.max_age() else {
        continue;
      };
      let partition = Partition::versioned(&strategy.partition_name, self.generation());
      match self.store.delete_expired(&partition, max_age) {
        Ok(count) => removed += count,
        Err(e) => warn!(partition = partition.name(), error = %e, "sweep skipped partition"),
      }
    }

    debug!(removed, "sweep finished");
    Ok(removed)
  }

  /// Build a router over the installed partitions.
  pub fn router<T: Transport + 'static>(
    &self,
    transport: Arc<T>,
  ) -> Result<Router<S, T>, LifecycleError> {
    self.require_active("route")?;
    Ok(Router::new(
      &self.config,
      Arc::clone(&self.store),
      transport,
    ))
  }

  fn require_active(&self, action: &'static str) -> Result<(), LifecycleError> {
    if self.state == LifecycleState::Active {
      Ok(())
    } else {
      Err(LifecycleError::InvalidTransition {
        action,
        state: self.state,
      })
    }
  }
}
