use std::sync::Arc;

use crate::scheduler::ReminderScheduler;
use crate::store::MedicationStore;

/// Store handle shared by the routes and the scheduler's query port.
pub type SharedStore = Arc<MedicationStore>;

pub type SharedScheduler = Arc<ReminderScheduler>;
