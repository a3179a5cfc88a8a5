//! Training lookup.
//!
//! Trainings are managed by administrators elsewhere; enrollment only
//! reads them through [`TrainingCatalog`].

use portal_db::queries::trainings;
use portal_db::{Result, Store};
use portal_types::training::Training;
use portal_types::TrainingId;

pub trait TrainingCatalog: Send + Sync {
    fn get_training(&self, id: TrainingId) -> Result<Option<Training>>;
}

/// Catalog backed by the `trainings` table.
#[derive(Clone)]
pub struct StoreCatalog {
    store: Store,
}

impl StoreCatalog {
    pub fn new(store: Store) -> Self {
        Self { store }
    }
}

impl TrainingCatalog for StoreCatalog {
    fn get_training(&self, id: TrainingId) -> Result<Option<Training>> {
        self.store.with_conn(|conn| trainings::get(conn, id))
    }
}
