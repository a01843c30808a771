//! GRU policy and critic networks using tch-rs (PyTorch bindings).
//!
//! Both networks share one topology: `input → hidden → hidden` with ReLU,
//! a single-layer GRU cell and a linear head. This module is only available
//! with the `nn` feature.

use tch::{nn, nn::Module, nn::RNN, Device, Tensor};

use super::{check_batch, HiddenState, RecurrentNetwork};
use crate::error::{Result, TrainingError};

/// Tensor-level access used by the snapshot and the update engine.
pub trait TorchNetwork: RecurrentNetwork {
    /// Batched single step: `input` is `[B, D]`, `hidden` is `[B, H]`.
    ///
    /// Returns `(output [B, O], new_hidden [B, H])`.
    fn step(&self, input: &Tensor, hidden: &Tensor) -> (Tensor, Tensor);

    fn var_store(&self) -> &nn::VarStore;

    fn var_store_mut(&mut self) -> &mut nn::VarStore;

    /// A freshly initialized network of the same shape on the same device.
    fn fresh(&self) -> Self
    where
        Self: Sized;

    fn device(&self) -> Device {
        self.var_store().device()
    }
}

struct GruCore {
    vs: nn::VarStore,
    encoder: nn::Sequential,
    gru: nn::GRU,
    head: nn::Linear,
    input_size: usize,
    hidden_size: usize,
    output_size: usize,
}

impl GruCore {
    fn new(input_size: usize, hidden_size: usize, output_size: usize, device: Device) -> Self {
        let vs = nn::VarStore::new(device);
        let root = vs.root();
        let h = hidden_size as i64;

        let encoder = nn::seq()
            .add(nn::linear(
                &root / "fc1",
                input_size as i64,
                h,
                Default::default(),
            ))
            .add_fn(|x| x.relu())
            .add(nn::linear(&root / "fc2", h, h, Default::default()))
            .add_fn(|x| x.relu());
        let gru = nn::gru(&root / "gru", h, h, Default::default());
        let head = nn::linear(&root / "head", h, output_size as i64, Default::default());

        Self {
            vs,
            encoder,
            gru,
            head,
            input_size,
            hidden_size,
            output_size,
        }
    }

    fn step(&self, input: &Tensor, hidden: &Tensor) -> (Tensor, Tensor) {
        let encoded = self.encoder.forward(input);
        let state = nn::GRUState(hidden.unsqueeze(0));
        let new_hidden = self.gru.step(&encoded, &state).0.squeeze_dim(0);
        let output = self.head.forward(&new_hidden);
        (output, new_hidden)
    }

    fn check_row(&self, network: &'static str, input: &[f32], hidden: &HiddenState) -> Result<()> {
        if input.len() != self.input_size {
            return Err(TrainingError::StateDimension {
                expected: self.input_size,
                actual: input.len(),
            });
        }
        if hidden.len() != self.hidden_size {
            return Err(TrainingError::InvalidConfig(format!(
                "{network} hidden state has {} entries, expected {}",
                hidden.len(),
                self.hidden_size
            )));
        }
        Ok(())
    }

    /// Stacks the rows into `[B, D]` and `[B, H]` and runs a single step.
    fn forward_rows(
        &self,
        network: &'static str,
        inputs: &[&[f32]],
        hidden: &[&HiddenState],
    ) -> Result<Vec<(Vec<f32>, HiddenState)>> {
        for (input, h) in inputs.iter().zip(hidden) {
            self.check_row(network, input, h)?;
        }
        let rows = inputs.len();
        if rows == 0 {
            return Ok(Vec::new());
        }

        let device = self.vs.device();
        let flat_inputs: Vec<f32> = inputs.iter().flat_map(|x| x.iter().copied()).collect();
        let flat_hidden: Vec<f32> = hidden
            .iter()
            .flat_map(|h| h.as_slice().iter().copied())
            .collect();
        let (output, new_hidden) = tch::no_grad(|| {
            let x = Tensor::from_slice(&flat_inputs)
                .view([rows as i64, self.input_size as i64])
                .to_device(device);
            let h = Tensor::from_slice(&flat_hidden)
                .view([rows as i64, self.hidden_size as i64])
                .to_device(device);
            self.step(&x, &h)
        });

        let output = Vec::<f32>::try_from(&output.view([-1]).to_device(Device::Cpu))?;
        let new_hidden = Vec::<f32>::try_from(&new_hidden.view([-1]).to_device(Device::Cpu))?;
        Ok(output
            .chunks(self.output_size)
            .zip(new_hidden.chunks(self.hidden_size))
            .map(|(out, h)| (out.to_vec(), HiddenState::from(h.to_vec())))
            .collect())
    }

    fn forward(
        &self,
        network: &'static str,
        input: &[f32],
        hidden: &HiddenState,
    ) -> Result<(Vec<f32>, HiddenState)> {
        self.forward_rows(network, &[input], &[hidden])?
            .pop()
            .ok_or(TrainingError::OutputArity {
                network,
                expected: self.output_size,
                actual: 0,
            })
    }

    fn forward_batch(
        &self,
        network: &'static str,
        inputs: &[Vec<f32>],
        hidden: &[HiddenState],
    ) -> Result<Vec<(Vec<f32>, HiddenState)>> {
        check_batch(inputs, hidden)?;
        let inputs: Vec<&[f32]> = inputs.iter().map(Vec::as_slice).collect();
        let hidden: Vec<&HiddenState> = hidden.iter().collect();
        self.forward_rows(network, &inputs, &hidden)
    }
}

/// Shared recurrent policy: global state with agent id → action logits.
pub struct GruPolicy {
    core: GruCore,
}

impl GruPolicy {
    pub fn new(state_dim: usize, hidden_size: usize, num_actions: usize, device: Device) -> Self {
        Self {
            core: GruCore::new(state_dim, hidden_size, num_actions, device),
        }
    }

    pub fn state_dim(&self) -> usize {
        self.core.input_size
    }

    pub fn num_parameters(&self) -> usize {
        self.core
            .vs
            .trainable_variables()
            .iter()
            .map(|t| t.numel())
            .sum()
    }
}

impl RecurrentNetwork for GruPolicy {
    fn hidden_size(&self) -> usize {
        self.core.hidden_size
    }

    fn output_size(&self) -> usize {
        self.core.output_size
    }

    fn forward(&self, input: &[f32], hidden: &HiddenState) -> Result<(Vec<f32>, HiddenState)> {
        self.core.forward("policy", input, hidden)
    }

    fn forward_batch(
        &self,
        inputs: &[Vec<f32>],
        hidden: &[HiddenState],
    ) -> Result<Vec<(Vec<f32>, HiddenState)>> {
        self.core.forward_batch("policy", inputs, hidden)
    }
}

impl TorchNetwork for GruPolicy {
    fn step(&self, input: &Tensor, hidden: &Tensor) -> (Tensor, Tensor) {
        self.core.step(input, hidden)
    }

    fn var_store(&self) -> &nn::VarStore {
        &self.core.vs
    }

    fn var_store_mut(&mut self) -> &mut nn::VarStore {
        &mut self.core.vs
    }

    fn fresh(&self) -> Self {
        Self::new(
            self.core.input_size,
            self.core.hidden_size,
            self.core.output_size,
            self.core.vs.device(),
        )
    }
}

/// Centralized recurrent critic: global state → scalar value.
pub struct GruCritic {
    core: GruCore,
}

impl GruCritic {
    pub fn new(state_dim: usize, hidden_size: usize, device: Device) -> Self {
        Self {
            core: GruCore::new(state_dim, hidden_size, 1, device),
        }
    }

    pub fn state_dim(&self) -> usize {
        self.core.input_size
    }
}

impl RecurrentNetwork for GruCritic {
    fn hidden_size(&self) -> usize {
        self.core.hidden_size
    }

    fn output_size(&self) -> usize {
        1
    }

    fn forward(&self, input: &[f32], hidden: &HiddenState) -> Result<(Vec<f32>, HiddenState)> {
        self.core.forward("critic", input, hidden)
    }

    fn forward_batch(
        &self,
        inputs: &[Vec<f32>],
        hidden: &[HiddenState],
    ) -> Result<Vec<(Vec<f32>, HiddenState)>> {
        self.core.forward_batch("critic", inputs, hidden)
    }
}

impl TorchNetwork for GruCritic {
    fn step(&self, input: &Tensor, hidden: &Tensor) -> (Tensor, Tensor) {
        self.core.step(input, hidden)
    }

    fn var_store(&self) -> &nn::VarStore {
        &self.core.vs
    }

    fn var_store_mut(&mut self) -> &mut nn::VarStore {
        &mut self.core.vs
    }

    fn fresh(&self) -> Self {
        Self::new(
            self.core.input_size,
            self.core.hidden_size,
            self.core.vs.device(),
        )
    }
}
