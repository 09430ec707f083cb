pub mod sgd;

use crate::nn::storage::GenericStorage;
use crate::utils::GenericResult;

pub use sgd::SgdUpdater;

/// Closed set of parameter-update rules. Each updater is bound to one
/// parameter slot of one layer via its storage key.
pub enum Updater {
    Sgd(SgdUpdater),
}

/// Forward one configuration directive. Unknown names are ignored; the
/// directive stream is shared with the layers.
pub fn set_updater_param(updater: &mut Updater, name: &str, val: &str) -> GenericResult<()> {
    match updater {
        Updater::Sgd(u) => u.set_param(name, val),
    }
}

/// Finalize the updater once parameter shapes exist.
pub fn init_updater(updater: &mut Updater, params: &GenericStorage) -> GenericResult<()> {
    match updater {
        Updater::Sgd(u) => u.init(params),
    }
}

/// Apply one update step; the epoch counter drives the learning-rate schedule.
pub fn update_params(
    updater: &mut Updater,
    params: &mut GenericStorage,
    grads: &mut GenericStorage,
    epoch: i64,
) -> GenericResult<()> {
    match updater {
        Updater::Sgd(u) => u.update(params, grads, epoch),
    }
}

pub fn start_round_updater(updater: &mut Updater, round: i32) {
    match updater {
        Updater::Sgd(u) => u.start_round(round),
    }
}
