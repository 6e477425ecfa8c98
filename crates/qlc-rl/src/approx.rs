//! Function approximation with experience replay (DQN-lite)
//!
//! A single-hidden-layer network maps engineered position features to one
//! value per action. Transitions go into a bounded replay buffer; every step
//! a random mini-batch is regressed against targets produced by a separate,
//! periodically synced target network.

use anyhow::{ensure, Result};
use ndarray::{Array1, Array2, Axis};
use rand::distributions::{Distribution, Uniform};
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use qlc_core::{Action, ApproximationConfig, GridCoordinate, GridEnvironment, TargetMode};

use crate::agent::AgentState;
use crate::algorithm::{epsilon_greedy, Policy, StepContext};
use crate::experience::{ReplayBuffer, Transition};

/// Feature vector for a cell
///
/// Own (row, col) followed by the signed offset to every goal, then to every
/// obstacle.
pub fn encode_features(env: &GridEnvironment, cell: GridCoordinate) -> Array1<f32> {
    let mut features = Vec::with_capacity(feature_width(env));
    features.push(cell.row as f32);
    features.push(cell.col as f32);
    for target in env.goals().iter().chain(env.obstacles()) {
        let (dr, dc) = cell.signed_delta(target);
        features.push(dr);
        features.push(dc);
    }
    Array1::from(features)
}

pub fn feature_width(env: &GridEnvironment) -> usize {
    2 + 2 * (env.goals().len() + env.obstacles().len())
}

/// Feed-forward network: ReLU hidden layer, linear output
#[derive(Debug, Clone, PartialEq)]
pub struct Mlp {
    w1: Array2<f32>,
    b1: Array1<f32>,
    w2: Array2<f32>,
    b2: Array1<f32>,
}

impl Mlp {
    /// He-uniform initialised network with hidden width `ceil(sqrt(input * output))`
    pub fn new(input: usize, output: usize, rng: &mut StdRng) -> Self {
        let hidden = ((input * output) as f32).sqrt().ceil().max(1.0) as usize;
        Self {
            w1: he_uniform(hidden, input, rng),
            b1: Array1::zeros(hidden),
            w2: he_uniform(output, hidden, rng),
            b2: Array1::zeros(output),
        }
    }

    pub fn input_width(&self) -> usize {
        self.w1.ncols()
    }

    pub fn hidden_width(&self) -> usize {
        self.w1.nrows()
    }

    pub fn output_width(&self) -> usize {
        self.w2.nrows()
    }

    /// Hidden pre-activations, hidden activations, output
    fn forward(&self, input: &Array1<f32>) -> (Array1<f32>, Array1<f32>, Array1<f32>) {
        let pre = self.w1.dot(input) + &self.b1;
        let hidden = pre.mapv(|v| v.max(0.0));
        let output = self.w2.dot(&hidden) + &self.b2;
        (pre, hidden, output)
    }

    pub fn predict(&self, input: &Array1<f32>) -> Array1<f32> {
        self.forward(input).2
    }

    /// One gradient-descent step on the batch mean-squared error, returning the loss
    pub fn train_batch(
        &mut self,
        inputs: &[Array1<f32>],
        targets: &[Array1<f32>],
        learning_rate: f32,
    ) -> f32 {
        let batch = inputs.len().min(targets.len());
        if batch == 0 {
            return 0.0;
        }

        let mut grad_w1 = Array2::<f32>::zeros(self.w1.raw_dim());
        let mut grad_b1 = Array1::<f32>::zeros(self.b1.raw_dim());
        let mut grad_w2 = Array2::<f32>::zeros(self.w2.raw_dim());
        let mut grad_b2 = Array1::<f32>::zeros(self.b2.raw_dim());
        let mut loss = 0.0;
        let scale = 2.0 / (batch * self.output_width()) as f32;

        for (input, target) in inputs.iter().zip(targets).take(batch) {
            let (pre, hidden, output) = self.forward(input);
            let error = &output - target;
            loss += error.mapv(|e| e * e).sum();

            let d_out = &error * scale;
            grad_w2 += &outer(&d_out, &hidden);
            grad_b2 += &d_out;

            let d_hidden = self.w2.t().dot(&d_out)
                * pre.mapv(|v| if v > 0.0 { 1.0 } else { 0.0 });
            grad_w1 += &outer(&d_hidden, input);
            grad_b1 += &d_hidden;
        }

        self.w1.scaled_add(-learning_rate, &grad_w1);
        self.b1.scaled_add(-learning_rate, &grad_b1);
        self.w2.scaled_add(-learning_rate, &grad_w2);
        self.b2.scaled_add(-learning_rate, &grad_b2);

        loss / (batch * self.output_width()) as f32
    }
}

fn he_uniform(rows: usize, fan_in: usize, rng: &mut StdRng) -> Array2<f32> {
    let limit = (6.0 / fan_in.max(1) as f32).sqrt();
    let dist = Uniform::new_inclusive(-limit, limit);
    Array2::from_shape_fn((rows, fan_in), |_| dist.sample(rng))
}

fn outer(a: &Array1<f32>, b: &Array1<f32>) -> Array2<f32> {
    let col = a.view().insert_axis(Axis(1));
    let row = b.view().insert_axis(Axis(0));
    col.dot(&row)
}

/// Result of a replay training request
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ReplayOutcome {
    /// Buffer below the training threshold; nothing was done
    Underfilled { len: usize, required: usize },
    Trained { loss: f32, batch: usize },
}

/// Replay-trained value approximation policy
#[derive(Debug, Clone)]
pub struct ApproximationPolicy {
    config: ApproximationConfig,
    online: Mlp,
    target: Mlp,
    buffer: ReplayBuffer,
    steps: usize,
    last_loss: Option<f32>,
}

impl ApproximationPolicy {
    pub fn new(config: ApproximationConfig, env: &GridEnvironment, rng: &mut StdRng) -> Self {
        let online = Mlp::new(feature_width(env), env.action_dim(), rng);
        Self {
            target: online.clone(),
            online,
            buffer: ReplayBuffer::new(config.buffer_capacity),
            config,
            steps: 0,
            last_loss: None,
        }
    }

    pub fn online(&self) -> &Mlp {
        &self.online
    }

    pub fn target(&self) -> &Mlp {
        &self.target
    }

    pub fn buffer(&self) -> &ReplayBuffer {
        &self.buffer
    }

    /// Append a transition to the replay buffer
    pub fn remember(&mut self, transition: Transition) {
        self.buffer.push(transition);
    }

    /// Copy the online weights into the target network
    pub fn update_target_model(&mut self) {
        self.target = self.online.clone();
    }

    fn features(&self, env: &GridEnvironment, cell: GridCoordinate) -> Result<Array1<f32>> {
        let features = encode_features(env, cell);
        ensure!(
            features.len() == self.online.input_width(),
            "feature width {} does not match network input {}; \
             reset the policy after editing goals or obstacles",
            features.len(),
            self.online.input_width()
        );
        Ok(features)
    }

    /// Action values predicted by the online network
    pub fn q_values(&self, env: &GridEnvironment, cell: GridCoordinate) -> Result<Array1<f32>> {
        Ok(self.online.predict(&self.features(env, cell)?))
    }

    /// Regression target for one transition
    ///
    /// Starts from the online prediction. Terminal transitions pin the taken
    /// action to the reward; otherwise the bootstrap from the target network
    /// overwrites every unit or only the taken one, per `target_mode`.
    fn replay_target(
        &self,
        env: &GridEnvironment,
        input: &Array1<f32>,
        t: &Transition,
        gamma: f32,
    ) -> Result<Array1<f32>> {
        let mut target = self.online.predict(input);
        let action = t.action.to_index();

        if t.done {
            target[action] = t.reward;
        } else {
            let next = self.target.predict(&self.features(env, t.next_state)?);
            let bootstrap =
                t.reward + gamma * next.iter().copied().fold(f32::NEG_INFINITY, f32::max);
            match self.config.target_mode {
                TargetMode::AllActions => target.fill(bootstrap),
                TargetMode::TakenAction => target[action] = bootstrap,
            }
        }
        Ok(target)
    }

    /// Sample a mini-batch and take one gradient step
    pub fn replay_train(
        &mut self,
        env: &GridEnvironment,
        gamma: f32,
        rng: &mut StdRng,
    ) -> Result<ReplayOutcome> {
        let required = self.config.train_start.max(1);
        if self.buffer.len() < required {
            return Ok(ReplayOutcome::Underfilled {
                len: self.buffer.len(),
                required,
            });
        }

        let batch = self.buffer.sample(self.config.batch_size, rng);
        let mut inputs = Vec::with_capacity(batch.len());
        let mut targets = Vec::with_capacity(batch.len());

        for t in &batch {
            let input = self.features(env, t.state)?;
            let target = self.replay_target(env, &input, t, gamma)?;
            inputs.push(input);
            targets.push(target);
        }

        let loss = self
            .online
            .train_batch(&inputs, &targets, self.config.learning_rate);
        self.last_loss = Some(loss);
        Ok(ReplayOutcome::Trained {
            loss,
            batch: batch.len(),
        })
    }
}

impl Policy for ApproximationPolicy {
    fn name(&self) -> &'static str {
        "function_approximation"
    }

    fn select_action(
        &mut self,
        env: &GridEnvironment,
        agent: &AgentState,
        _ctx: StepContext,
        rng: &mut StdRng,
    ) -> Result<Action> {
        let values = self.q_values(env, agent.position)?;
        Ok(epsilon_greedy(
            env,
            agent,
            |a| values[a.to_index()],
            rng,
        ))
    }

    fn learn(
        &mut self,
        env: &GridEnvironment,
        agent: &AgentState,
        transition: &Transition,
        ctx: StepContext,
        rng: &mut StdRng,
    ) -> Result<()> {
        self.remember(*transition);
        self.steps += 1;

        if let ReplayOutcome::Trained { loss, batch } = self.replay_train(env, agent.gamma, rng)? {
            debug!(agent = agent.id, loss, batch, "Replay step");
        }

        let interval = self.config.target_update_interval.max(1);
        if self.steps % interval == 0 || (transition.done && !ctx.is_last()) {
            self.update_target_model();
        }
        Ok(())
    }

    fn reset(&mut self, env: &GridEnvironment, rng: &mut StdRng) -> Result<()> {
        self.online = Mlp::new(feature_width(env), env.action_dim(), rng);
        self.target = self.online.clone();
        self.buffer.clear();
        self.steps = 0;
        self.last_loss = None;
        Ok(())
    }

    fn params(&self) -> serde_json::Value {
        serde_json::json!({
            "input": self.online.input_width(),
            "hidden": self.online.hidden_width(),
            "output": self.online.output_width(),
            "buffer_len": self.buffer.len(),
            "steps": self.steps,
            "last_loss": self.last_loss,
            "target_mode": self.config.target_mode,
        })
    }
}
