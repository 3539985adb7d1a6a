use candle_core::{DType, Device, Result, Tensor, Var};
use candle_nn::{Optimizer, VarMap};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[clap(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum OptimizerKind {
    Adam,
    Sgd,
}

#[derive(Clone, Debug)]
pub struct ParamsAdam {
    pub lr: f64,
    pub beta1: f64,
    pub beta2: f64,
    pub eps: f64,
}

impl Default for ParamsAdam {
    fn default() -> Self {
        Self {
            lr: 0.001,
            beta1: 0.9,
            beta2: 0.999,
            eps: 1e-8,
        }
    }
}

#[derive(Debug)]
struct VarAdam {
    name: String,
    var: Var,
    first_moment: Var,
    second_moment: Var,
}

/// Adam without weight decay whose moments can be written to and read
/// back from a safetensors file, so a resumed run continues with the
/// same optimizer state it stopped with.
#[derive(Debug)]
pub struct Adam {
    vars: Vec<VarAdam>,
    step_t: usize,
    params: ParamsAdam,
}

impl Adam {
    fn from_named(named: Vec<(String, Var)>, params: ParamsAdam) -> Result<Self> {
        let vars = named
            .into_iter()
            .filter(|(_, var)| var.dtype().is_float())
            .map(|(name, var)| {
                let first_moment = Var::zeros(var.shape(), var.dtype(), var.device())?;
                let second_moment = Var::zeros(var.shape(), var.dtype(), var.device())?;
                Ok(VarAdam {
                    name,
                    var,
                    first_moment,
                    second_moment,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            vars,
            step_t: 0,
            params,
        })
    }

    /// Track every variable of `parameters` under its own name
    pub fn from_varmap(parameters: &VarMap, params: ParamsAdam) -> Result<Self> {
        let data = parameters
            .data()
            .lock()
            .map_err(|_| candle_core::Error::Msg("variable map lock poisoned".into()))?;
        let mut named: Vec<(String, Var)> =
            data.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        named.sort_by(|a, b| a.0.cmp(&b.0));
        Self::from_named(named, params)
    }

    pub fn num_steps(&self) -> usize {
        self.step_t
    }

    fn state_tensors(&self) -> Result<HashMap<String, Tensor>> {
        let mut state = HashMap::new();
        for v in self.vars.iter() {
            state.insert(format!("m.{}", v.name), v.first_moment.as_tensor().clone());
            state.insert(format!("v.{}", v.name), v.second_moment.as_tensor().clone());
        }
        state.insert(
            "step".to_string(),
            Tensor::new(&[self.step_t as u32], &Device::Cpu)?,
        );
        Ok(state)
    }

    pub fn save_state<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        candle_core::safetensors::save(&self.state_tensors()?, path)
    }

    pub fn load_state<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let state = candle_core::safetensors::load(path, &Device::Cpu)?;
        let take = |key: &str| {
            state
                .get(key)
                .ok_or_else(|| candle_core::Error::Msg(format!("optimizer state lacks {}", key)))
        };
        for v in self.vars.iter() {
            let m = take(&format!("m.{}", v.name))?;
            let s = take(&format!("v.{}", v.name))?;
            v.first_moment
                .set(&m.to_device(v.var.device())?.to_dtype(v.var.dtype())?)?;
            v.second_moment
                .set(&s.to_device(v.var.device())?.to_dtype(v.var.dtype())?)?;
        }
        self.step_t = take("step")?
            .flatten_all()?
            .to_dtype(DType::U32)?
            .to_vec1::<u32>()?
            .first()
            .copied()
            .ok_or_else(|| candle_core::Error::Msg("optimizer state has an empty step".into()))?
            as usize;
        Ok(())
    }
}

impl Optimizer for Adam {
    type Config = ParamsAdam;

    fn new(vars: Vec<Var>, params: ParamsAdam) -> Result<Self> {
        let named = vars
            .into_iter()
            .enumerate()
            .map(|(i, v)| (format!("var.{}", i), v))
            .collect();
        Self::from_named(named, params)
    }

    fn learning_rate(&self) -> f64 {
        self.params.lr
    }

    fn set_learning_rate(&mut self, lr: f64) {
        self.params.lr = lr
    }

    fn step(&mut self, grads: &candle_core::backprop::GradStore) -> Result<()> {
        self.step_t += 1;
        let lr = self.params.lr;
        let beta1 = self.params.beta1;
        let beta2 = self.params.beta2;
        let scale_m = 1f64 / (1f64 - beta1.powi(self.step_t as i32));
        let scale_v = 1f64 / (1f64 - beta2.powi(self.step_t as i32));
        for var in self.vars.iter() {
            let theta = &var.var;
            let m = &var.first_moment;
            let v = &var.second_moment;
            if let Some(g) = grads.get(theta) {
                let next_m = ((m.as_tensor() * beta1)? + (g * (1.0 - beta1))?)?;
                let next_v = ((v.as_tensor() * beta2)? + (g.sqr()? * (1.0 - beta2))?)?;
                let m_hat = (&next_m * scale_m)?;
                let v_hat = (&next_v * scale_v)?;
                let adjusted_grad = (m_hat / (v_hat.sqrt()? + self.params.eps)?)?;
                let next_theta = (theta.as_tensor() - (adjusted_grad * lr)?)?;
                m.set(&next_m)?;
                v.set(&next_v)?;
                theta.set(&next_theta)?;
            }
        }
        Ok(())
    }
}

/// The optimizers a training run may choose from
pub enum TrainOptimizer {
    Adam(Adam),
    Sgd(candle_nn::SGD),
}

impl TrainOptimizer {
    pub fn new(kind: OptimizerKind, parameters: &VarMap, learning_rate: f64) -> Result<Self> {
        match kind {
            OptimizerKind::Adam => Ok(Self::Adam(Adam::from_varmap(
                parameters,
                ParamsAdam {
                    lr: learning_rate,
                    ..ParamsAdam::default()
                },
            )?)),
            OptimizerKind::Sgd => Ok(Self::Sgd(candle_nn::SGD::new(
                parameters.all_vars(),
                learning_rate,
            )?)),
        }
    }

    pub fn backward_step(&mut self, loss: &Tensor) -> Result<()> {
        match self {
            Self::Adam(adam) => adam.backward_step(loss),
            Self::Sgd(sgd) => sgd.backward_step(loss),
        }
    }

    /// SGD carries no state; nothing is written for it
    pub fn save_state<P: AsRef<Path>>(&self, path: P) -> Result<bool> {
        match self {
            Self::Adam(adam) => adam.save_state(path).map(|_| true),
            Self::Sgd(_) => Ok(false),
        }
    }

    pub fn load_state<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        match self {
            Self::Adam(adam) => adam.load_state(path),
            Self::Sgd(_) => Ok(()),
        }
    }
}
