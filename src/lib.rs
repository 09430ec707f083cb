pub mod integration;
pub mod nn;
pub mod utils;

pub use nn::net::NeuralNet;
pub use nn::trainers::{create_net_trainer, NetTrainer, TrainerOps};
pub use utils::{ArrayDynF, GenericResult};
