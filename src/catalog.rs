//! Level catalog: fetched once per process, read-only afterwards.
//!
//! A failed load is not cached, so callers can simply call `load()` again.

use std::sync::Arc;

use tokio::sync::OnceCell;
use tracing::{error, info, instrument};

use crate::config::LevelSource;
use crate::domain::{Level, LevelId};
use crate::error::DrillError;
use crate::remote::DrillBackend;
use crate::seeds::builtin_levels;

pub type Levels = Arc<[Arc<Level>]>;

pub struct LevelCatalog<B> {
  backend: Arc<B>,
  source: LevelSource,
  levels: OnceCell<Levels>,
}

impl<B: DrillBackend> LevelCatalog<B> {
  pub fn new(backend: Arc<B>, source: LevelSource) -> Self {
    Self { backend, source, levels: OnceCell::new() }
  }

  #[instrument(level = "info", skip(self), fields(source = ?self.source))]
  pub async fn load(&self) -> Result<Levels, DrillError> {
    let levels = self
      .levels
      .get_or_try_init(|| async {
        let raw = match self.source {
          LevelSource::Builtin => builtin_levels(),
          LevelSource::Remote => self.backend.levels().await.map_err(|e| {
            error!(target: "drill_backend", error = %e, "Level catalog fetch failed");
            match e {
              DrillError::CatalogUnavailable(_) => e,
              other => DrillError::CatalogUnavailable(other.to_string()),
            }
          })?,
        };
        if raw.is_empty() {
          return Err(DrillError::CatalogUnavailable("word service returned no levels".into()));
        }
        info!(target: "drill_backend", count = raw.len(), "Level catalog loaded");
        Ok(raw.into_iter().map(Arc::new).collect::<Levels>())
      })
      .await?;
    Ok(levels.clone())
  }

  /// Look a level up by id, loading the catalog first if needed.
  pub async fn select(&self, level_id: LevelId) -> Result<Arc<Level>, DrillError> {
    let levels = self.load().await?;
    levels
      .iter()
      .find(|l| l.level_id == level_id)
      .cloned()
      .ok_or(DrillError::UnknownLevel(level_id))
  }

  pub fn cached(&self) -> Option<Levels> {
    self.levels.get().cloned()
  }
}
