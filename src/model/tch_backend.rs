use std::{fs, path::Path};

use parking_lot::Mutex;
use tch::{CModule, Device, IValue, Kind, Tensor, no_grad};

use crate::{
    error::ModelError,
    model::{AttentionMode, AttentionTrace, ForwardOutput, LanguageModel, ModelSpec},
};

/// Name of the scripted method the exported checkpoint must provide.
const TRACE_METHOD: &str = "forward_with_attn_trace";

/// TorchScript checkpoint exposing
/// `forward_with_attn_trace(ids, trace_layer, return_full_attn) -> (logits, attn)`.
pub struct TorchModel {
    spec: ModelSpec,
    device: Device,
    module: Mutex<CModule>,
}

impl TorchModel {
    pub fn load(checkpoint: &Path, model_config: &Path, device: &str) -> Result<Self, ModelError> {
        if !checkpoint.exists() {
            return Err(ModelError::MissingArtifact(checkpoint.display().to_string()));
        }
        if !model_config.exists() {
            return Err(ModelError::MissingArtifact(model_config.display().to_string()));
        }

        let raw = fs::read_to_string(model_config)?;
        let spec: ModelSpec =
            serde_json::from_str(&raw).map_err(|e| ModelError::Config(e.to_string()))?;
        spec.validate()?;

        let device = parse_device(device);
        let size_bytes = fs::metadata(checkpoint)?.len();
        let mut module = CModule::load_on_device(checkpoint, device)
            .map_err(|e| ModelError::Forward(e.to_string()))?;
        module.set_eval();

        tracing::info!(
            path = %checkpoint.display(),
            size_bytes,
            ?device,
            ?spec,
            "torchscript checkpoint loaded"
        );

        Ok(Self {
            spec,
            device,
            module: Mutex::new(module),
        })
    }
}

impl LanguageModel for TorchModel {
    fn spec(&self) -> &ModelSpec {
        &self.spec
    }

    fn forward(
        &self,
        context: &[u32],
        trace_layer: usize,
        mode: AttentionMode,
    ) -> Result<ForwardOutput, ModelError> {
        let ids: Vec<i64> = context.iter().map(|&id| i64::from(id)).collect();
        let t = ids.len();

        no_grad(|| -> Result<ForwardOutput, ModelError> {
            let input = Tensor::from_slice(&ids)
                .reshape([1, t as i64])
                .to_device(self.device);
            let inputs = [
                IValue::Tensor(input),
                IValue::Int(trace_layer as i64),
                IValue::Bool(mode == AttentionMode::Full),
            ];

            let output = {
                let module = self.module.lock();
                module
                    .method_is(TRACE_METHOD, &inputs)
                    .map_err(|e| ModelError::Forward(e.to_string()))?
            };

            let IValue::Tuple(mut items) = output else {
                return Err(ModelError::Output("expected a (logits, attn) tuple".into()));
            };
            if items.len() != 2 {
                return Err(ModelError::Output(format!(
                    "expected 2 outputs, got {}",
                    items.len()
                )));
            }
            let (Some(IValue::Tensor(attn)), Some(IValue::Tensor(logits))) =
                (items.pop(), items.pop())
            else {
                return Err(ModelError::Output("outputs must be tensors".into()));
            };

            // (1, t, V) -> (V,)
            let last = logits.select(0, 0).select(0, -1);
            let logits = to_host_vec(&last)?;
            if logits.len() != self.spec.vocab_size {
                return Err(ModelError::Output(format!(
                    "expected {} logits, got {}",
                    self.spec.vocab_size,
                    logits.len()
                )));
            }

            let heads = self.spec.n_heads;
            let attn = attn.select(0, 0);
            let attention = match mode {
                AttentionMode::Row => {
                    expect_shape(&attn, &[heads, t])?;
                    AttentionTrace::Row(chunk(to_host_vec(&attn)?, t))
                }
                AttentionMode::Full => {
                    expect_shape(&attn, &[heads, t, t])?;
                    let rows = chunk(to_host_vec(&attn)?, t);
                    AttentionTrace::Full(rows.chunks(t).map(<[_]>::to_vec).collect())
                }
            };

            Ok(ForwardOutput { logits, attention })
        })
    }
}

fn to_host_vec(tensor: &Tensor) -> Result<Vec<f32>, ModelError> {
    let flat = tensor
        .to_device(Device::Cpu)
        .to_kind(Kind::Float)
        .contiguous()
        .view([-1]);
    Vec::<f32>::try_from(&flat).map_err(|e| ModelError::Output(e.to_string()))
}

fn expect_shape(tensor: &Tensor, expected: &[usize]) -> Result<(), ModelError> {
    let actual: Vec<usize> = tensor.size().iter().map(|&d| d as usize).collect();
    if actual != expected {
        return Err(ModelError::Output(format!(
            "attention shape {actual:?}, expected {expected:?}"
        )));
    }
    Ok(())
}

fn chunk(values: Vec<f32>, width: usize) -> Vec<Vec<f32>> {
    values.chunks(width.max(1)).map(<[f32]>::to_vec).collect()
}

fn parse_device(raw: &str) -> Device {
    let lower = raw.to_lowercase();
    if lower.starts_with("cuda") {
        let idx = lower
            .split(':')
            .nth(1)
            .and_then(|s| s.parse::<usize>().ok())
            .unwrap_or(0);
        if tch::Cuda::is_available() {
            return Device::Cuda(idx);
        }
        tracing::warn!(requested = raw, "cuda unavailable, falling back to cpu");
    }
    Device::Cpu
}
