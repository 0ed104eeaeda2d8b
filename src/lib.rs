mod config;
mod constants;
mod errors;
mod hub;
mod metrics;
mod proto;
mod rpc;
mod store;
pub mod utils;

pub use config::*;
pub use constants::*;
pub use errors::*;
pub use hub::*;
pub use metrics::*;
pub use proto::*;
pub use rpc::*;
pub use store::*;

//-----------------------------------------------------------
// Autometrics
/// autometrics: https://docs.autometrics.dev/rust/adding-alerts-and-slos
use autometrics::objectives::Objective;
use autometrics::objectives::ObjectiveLatency;
use autometrics::objectives::ObjectivePercentile;
const API_SLO: Objective = Objective::new("api")
    .success_rate(ObjectivePercentile::P99_9)
    .latency(ObjectiveLatency::Ms10, ObjectivePercentile::P99);
