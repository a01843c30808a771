//! Frozen parameter snapshots ("old" networks).

use tch::Tensor;

use crate::error::Result;
use crate::network::TorchNetwork;

/// A deep copy of a network's parameters that does not track gradients.
///
/// Owns its own variable store, so later gradient steps on the live network
/// cannot reach it.
pub struct Frozen<N> {
    network: N,
}

impl<N: TorchNetwork> Frozen<N> {
    /// Copies every parameter of `live` into a new frozen network.
    pub fn capture(live: &N) -> Result<Self> {
        let mut network = live.fresh();
        network.var_store_mut().copy(live.var_store())?;
        network.var_store_mut().freeze();
        Ok(Self { network })
    }

    pub fn network(&self) -> &N {
        &self.network
    }

    /// Batched step without gradient tracking.
    pub fn step(&self, input: &Tensor, hidden: &Tensor) -> (Tensor, Tensor) {
        tch::no_grad(|| self.network.step(input, hidden))
    }
}
