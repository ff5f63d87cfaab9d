pub mod addresses;
pub mod config;
pub mod dest;
pub mod email_notify;
pub mod filters;
pub mod handlers;
pub mod models;
pub mod reconcile;
pub mod run_db;
pub mod runner;
pub mod source;
pub mod tree_diff;

use std::sync::atomic::AtomicU64;
use std::sync::Arc;

use addresses::AddressCleanser;
use config::Settings;
use dest::writer::BusinessLogicClient;
use dest::DstFacade;
use email_notify::EmailNotifier;
use run_db::RunDb;
use source::SrcFacade;

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub run_db: Arc<RunDb>,
    pub src: Arc<dyn SrcFacade>,
    pub dst: Arc<dyn DstFacade>,
    pub cleanser: Arc<dyn AddressCleanser>,
    pub business_logic: Arc<BusinessLogicClient>,
    pub email: Arc<EmailNotifier>,
    /// Seconds since epoch of the last successful non-dry run; 0 before
    /// the first success. Exposed on /metrics.
    pub last_success: Arc<AtomicU64>,
}
