//! Neural matrix factorization network: a GMF (elementwise product of
//! user and item embeddings) branch and an MLP branch over concatenated
//! embeddings, joined by a final sigmoid head. Gradients are computed
//! by hand so training needs nothing beyond `ndarray`.

use ndarray::{Array1, Array2, Axis, Zip};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

const ADAM_BETA1: f32 = 0.9;
const ADAM_BETA2: f32 = 0.999;
const ADAM_EPS: f32 = 1e-8;
const BN_MOMENTUM: f32 = 0.9;
const BN_EPS: f32 = 1e-5;
/// Logits are clamped before the sigmoid so extreme values cannot
/// overflow into NaN losses.
const LOGIT_CLAMP: f32 = 30.0;
const PROB_CLAMP: f32 = 1e-7;

fn adam_update<D: ndarray::Dimension>(
    param: &mut ndarray::Array<f32, D>,
    grad: &ndarray::Array<f32, D>,
    m: &mut ndarray::Array<f32, D>,
    v: &mut ndarray::Array<f32, D>,
    lr: f32,
    step: i32,
) {
    let bias1 = 1.0 - ADAM_BETA1.powi(step);
    let bias2 = 1.0 - ADAM_BETA2.powi(step);
    Zip::from(param)
        .and(grad)
        .and(m)
        .and(v)
        .for_each(|p, &g, m, v| {
            *m = ADAM_BETA1 * *m + (1.0 - ADAM_BETA1) * g;
            *v = ADAM_BETA2 * *v + (1.0 - ADAM_BETA2) * g * g;
            let m_hat = *m / bias1;
            let v_hat = *v / bias2;
            *p -= lr * m_hat / (v_hat.sqrt() + ADAM_EPS);
        });
}

fn sigmoid(logits: &Array1<f32>) -> Array1<f32> {
    logits.mapv(|z| {
        let z = z.clamp(-LOGIT_CLAMP, LOGIT_CLAMP);
        1.0 / (1.0 + (-z).exp())
    })
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Dense {
    w: Array2<f32>,
    b: Array1<f32>,
    m_w: Array2<f32>,
    v_w: Array2<f32>,
    m_b: Array1<f32>,
    v_b: Array1<f32>,
}

impl Dense {
    fn new(fan_in: usize, fan_out: usize, rng: &mut StdRng) -> Self {
        let bound = (6.0 / (fan_in + fan_out) as f32).sqrt();
        let w = Array2::from_shape_fn((fan_in, fan_out), |_| rng.gen_range(-bound..bound));
        Self {
            m_w: Array2::zeros(w.raw_dim()),
            v_w: Array2::zeros(w.raw_dim()),
            w,
            b: Array1::zeros(fan_out),
            m_b: Array1::zeros(fan_out),
            v_b: Array1::zeros(fan_out),
        }
    }

    fn forward(&self, x: &Array2<f32>) -> Array2<f32> {
        x.dot(&self.w) + &self.b
    }

    /// Returns the gradient with respect to the input and applies the
    /// parameter update in place.
    fn backward(
        &mut self,
        x: &Array2<f32>,
        grad_out: &Array2<f32>,
        lr: f32,
        step: i32,
    ) -> Array2<f32> {
        let grad_w = x.t().dot(grad_out);
        let grad_b = grad_out.sum_axis(Axis(0));
        let grad_in = grad_out.dot(&self.w.t());
        adam_update(&mut self.w, &grad_w, &mut self.m_w, &mut self.v_w, lr, step);
        adam_update(&mut self.b, &grad_b, &mut self.m_b, &mut self.v_b, lr, step);
        grad_in
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct BatchNorm {
    gamma: Array1<f32>,
    beta: Array1<f32>,
    running_mean: Array1<f32>,
    running_var: Array1<f32>,
    m_gamma: Array1<f32>,
    v_gamma: Array1<f32>,
    m_beta: Array1<f32>,
    v_beta: Array1<f32>,
}

struct BatchNormCache {
    x_hat: Array2<f32>,
    centered: Array2<f32>,
    std: Array1<f32>,
}

impl BatchNorm {
    fn new(dim: usize) -> Self {
        Self {
            gamma: Array1::ones(dim),
            beta: Array1::zeros(dim),
            running_mean: Array1::zeros(dim),
            running_var: Array1::ones(dim),
            m_gamma: Array1::zeros(dim),
            v_gamma: Array1::zeros(dim),
            m_beta: Array1::zeros(dim),
            v_beta: Array1::zeros(dim),
        }
    }

    fn forward_train(&mut self, x: &Array2<f32>) -> (Array2<f32>, BatchNormCache) {
        let mean = x.mean_axis(Axis(0)).unwrap_or_else(|| Array1::zeros(x.ncols()));
        let var = x.var_axis(Axis(0), 0.0);
        let std = var.mapv(|v| (v + BN_EPS).sqrt());
        let centered = x - &mean;
        let x_hat = &centered / &std;
        let out = &x_hat * &self.gamma + &self.beta;

        self.running_mean = &self.running_mean * BN_MOMENTUM + &mean * (1.0 - BN_MOMENTUM);
        self.running_var = &self.running_var * BN_MOMENTUM + &var * (1.0 - BN_MOMENTUM);

        (out, BatchNormCache { x_hat, centered, std })
    }

    fn forward_infer(&self, x: &Array2<f32>) -> Array2<f32> {
        let std = self.running_var.mapv(|v| (v + BN_EPS).sqrt());
        let x_hat = (x - &self.running_mean) / &std;
        &x_hat * &self.gamma + &self.beta
    }

    fn backward(
        &mut self,
        cache: &BatchNormCache,
        grad_out: &Array2<f32>,
        lr: f32,
        step: i32,
    ) -> Array2<f32> {
        let n = grad_out.nrows() as f32;
        let grad_gamma = (grad_out * &cache.x_hat).sum_axis(Axis(0));
        let grad_beta = grad_out.sum_axis(Axis(0));

        let grad_x_hat = grad_out * &self.gamma;
        let inv_std = cache.std.mapv(|s| 1.0 / s);
        let grad_var = (&grad_x_hat * &cache.centered).sum_axis(Axis(0))
            * cache.std.mapv(|s| -0.5 / (s * s * s));
        let grad_mean = grad_x_hat.sum_axis(Axis(0)) * inv_std.mapv(|s| -s)
            + &grad_var * cache.centered.mean_axis(Axis(0)).unwrap_or_else(|| {
                Array1::zeros(grad_out.ncols())
            }) * -2.0;
        let grad_in = &grad_x_hat * &inv_std
            + &cache.centered * &grad_var.mapv(|g| 2.0 * g / n)
            + &grad_mean.mapv(|g| g / n);

        adam_update(
            &mut self.gamma,
            &grad_gamma,
            &mut self.m_gamma,
            &mut self.v_gamma,
            lr,
            step,
        );
        adam_update(
            &mut self.beta,
            &grad_beta,
            &mut self.m_beta,
            &mut self.v_beta,
            lr,
            step,
        );
        grad_in
    }
}

/// One MLP tower stage: Dense -> BatchNorm -> ReLU -> Dropout.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct MlpLayer {
    dense: Dense,
    norm: BatchNorm,
}

struct MlpLayerCache {
    input: Array2<f32>,
    norm: BatchNormCache,
    relu_mask: Array2<f32>,
    drop_mask: Array2<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Embedding {
    table: Array2<f32>,
    m: Array2<f32>,
    v: Array2<f32>,
}

impl Embedding {
    fn new(rows: usize, dim: usize, rng: &mut StdRng) -> Self {
        let table = Array2::from_shape_fn((rows, dim), |_| rng.gen_range(-0.05..0.05f32));
        Self {
            m: Array2::zeros(table.raw_dim()),
            v: Array2::zeros(table.raw_dim()),
            table,
        }
    }

    fn lookup(&self, indices: &[usize]) -> Array2<f32> {
        let dim = self.table.ncols();
        let mut out = Array2::zeros((indices.len(), dim));
        for (row, &idx) in indices.iter().enumerate() {
            out.row_mut(row).assign(&self.table.row(idx));
        }
        out
    }

    /// Scatter-add row gradients, then one Adam step over the full table.
    fn apply_grads(&mut self, indices: &[usize], grads: &Array2<f32>, lr: f32, step: i32) {
        let mut full = Array2::zeros(self.table.raw_dim());
        for (row, &idx) in indices.iter().enumerate() {
            let mut target = full.row_mut(idx);
            target += &grads.row(row);
        }
        adam_update(&mut self.table, &full, &mut self.m, &mut self.v, lr, step);
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NcfNetwork {
    user_gmf: Embedding,
    item_gmf: Embedding,
    user_mlp: Embedding,
    item_mlp: Embedding,
    tower: Vec<MlpLayer>,
    head: Dense,
    dropout: f32,
    adam_step: i32,
}

impl NcfNetwork {
    pub fn new(
        n_users: usize,
        n_items: usize,
        gmf_dim: usize,
        mlp_dim: usize,
        mlp_layers: &[usize],
        dropout: f32,
        seed: u64,
    ) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let user_gmf = Embedding::new(n_users, gmf_dim, &mut rng);
        let item_gmf = Embedding::new(n_items, gmf_dim, &mut rng);
        let user_mlp = Embedding::new(n_users, mlp_dim, &mut rng);
        let item_mlp = Embedding::new(n_items, mlp_dim, &mut rng);

        let mut tower = Vec::with_capacity(mlp_layers.len());
        let mut fan_in = mlp_dim * 2;
        for &width in mlp_layers {
            tower.push(MlpLayer {
                dense: Dense::new(fan_in, width, &mut rng),
                norm: BatchNorm::new(width),
            });
            fan_in = width;
        }
        let head = Dense::new(gmf_dim + fan_in, 1, &mut rng);

        Self {
            user_gmf,
            item_gmf,
            user_mlp,
            item_mlp,
            tower,
            head,
            dropout,
            adam_step: 0,
        }
    }

    /// Inference-mode predictions in [0, 1].
    pub fn predict(&self, users: &[usize], items: &[usize]) -> Array1<f32> {
        let gmf = self.user_gmf.lookup(users) * self.item_gmf.lookup(items);
        let mut mlp = ndarray::concatenate(
            Axis(1),
            &[
                self.user_mlp.lookup(users).view(),
                self.item_mlp.lookup(items).view(),
            ],
        )
        .unwrap_or_else(|_| Array2::zeros((users.len(), 0)));
        for layer in &self.tower {
            let pre = layer.dense.forward(&mlp);
            let normed = layer.norm.forward_infer(&pre);
            mlp = normed.mapv(|v| v.max(0.0));
        }
        let joined = ndarray::concatenate(Axis(1), &[gmf.view(), mlp.view()])
            .unwrap_or_else(|_| gmf.clone());
        let logits = self.head.forward(&joined).index_axis_move(Axis(1), 0);
        sigmoid(&logits)
    }

    /// One optimizer step over a minibatch. Returns the batch BCE loss.
    pub fn train_batch(
        &mut self,
        users: &[usize],
        items: &[usize],
        targets: &Array1<f32>,
        lr: f32,
        rng: &mut StdRng,
    ) -> f32 {
        let batch = users.len() as f32;
        let user_gmf = self.user_gmf.lookup(users);
        let item_gmf = self.item_gmf.lookup(items);
        let gmf = &user_gmf * &item_gmf;

        let user_mlp = self.user_mlp.lookup(users);
        let item_mlp = self.item_mlp.lookup(items);
        let mut activations = ndarray::concatenate(
            Axis(1),
            &[user_mlp.view(), item_mlp.view()],
        )
        .unwrap_or_else(|_| Array2::zeros((users.len(), 0)));

        let keep = 1.0 - self.dropout;
        let mut caches: Vec<MlpLayerCache> = Vec::with_capacity(self.tower.len());
        for layer in &mut self.tower {
            let input = activations.clone();
            let pre = layer.dense.forward(&input);
            let (normed, norm_cache) = layer.norm.forward_train(&pre);
            let relu_mask = normed.mapv(|v| if v > 0.0 { 1.0 } else { 0.0 });
            let post_relu = &normed * &relu_mask;
            let drop_mask = if self.dropout > 0.0 {
                post_relu.mapv(|_| if rng.gen::<f32>() < keep { 1.0 / keep } else { 0.0 })
            } else {
                Array2::ones(post_relu.raw_dim())
            };
            activations = &post_relu * &drop_mask;
            caches.push(MlpLayerCache {
                input,
                norm: norm_cache,
                relu_mask,
                drop_mask,
            });
        }

        let joined = ndarray::concatenate(Axis(1), &[gmf.view(), activations.view()])
            .unwrap_or_else(|_| gmf.clone());
        let logits = self.head.forward(&joined).index_axis_move(Axis(1), 0);
        let preds = sigmoid(&logits);

        let loss = -Zip::from(&preds)
            .and(targets)
            .fold(0.0f32, |acc, &p, &t| {
                let p = p.clamp(PROB_CLAMP, 1.0 - PROB_CLAMP);
                acc + t * p.ln() + (1.0 - t) * (1.0 - p).ln()
            })
            / batch;

        self.adam_step += 1;
        let step = self.adam_step;

        // d(loss)/d(logit) for sigmoid + BCE collapses to (p - t) / B.
        let grad_logits = (&preds - targets) / batch;
        let grad_joined_flat = grad_logits.insert_axis(Axis(1));
        let grad_joined = self.head.backward(&joined, &grad_joined_flat, lr, step);

        let gmf_dim = gmf.ncols();
        let grad_gmf = grad_joined.slice(ndarray::s![.., ..gmf_dim]).to_owned();
        let mut grad_tower = grad_joined.slice(ndarray::s![.., gmf_dim..]).to_owned();

        for (layer, cache) in self.tower.iter_mut().zip(caches.iter()).rev() {
            let grad_post_relu = &grad_tower * &cache.drop_mask;
            let grad_normed = &grad_post_relu * &cache.relu_mask;
            let grad_pre = layer.norm.backward(&cache.norm, &grad_normed, lr, step);
            grad_tower = layer.dense.backward(&cache.input, &grad_pre, lr, step);
        }

        let mlp_dim = user_mlp.ncols();
        let grad_user_mlp = grad_tower.slice(ndarray::s![.., ..mlp_dim]).to_owned();
        let grad_item_mlp = grad_tower.slice(ndarray::s![.., mlp_dim..]).to_owned();
        let grad_user_gmf = &grad_gmf * &item_gmf;
        let grad_item_gmf = &grad_gmf * &user_gmf;

        self.user_gmf.apply_grads(users, &grad_user_gmf, lr, step);
        self.item_gmf.apply_grads(items, &grad_item_gmf, lr, step);
        self.user_mlp.apply_grads(users, &grad_user_mlp, lr, step);
        self.item_mlp.apply_grads(items, &grad_item_mlp, lr, step);

        loss
    }

    /// Validation BCE without touching parameters or batch statistics.
    pub fn evaluate(&self, users: &[usize], items: &[usize], targets: &Array1<f32>) -> f32 {
        if users.is_empty() {
            return 0.0;
        }
        let preds = self.predict(users, items);
        -Zip::from(&preds)
            .and(targets)
            .fold(0.0f32, |acc, &p, &t| {
                let p = p.clamp(PROB_CLAMP, 1.0 - PROB_CLAMP);
                acc + t * p.ln() + (1.0 - t) * (1.0 - p).ln()
            })
            / users.len() as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toy_network() -> NcfNetwork {
        NcfNetwork::new(4, 6, 4, 4, &[8, 4], 0.0, 7)
    }

    #[test]
    fn test_predictions_bounded() {
        let net = toy_network();
        let preds = net.predict(&[0, 1, 2], &[0, 3, 5]);
        assert_eq!(preds.len(), 3);
        for &p in preds.iter() {
            assert!((0.0..=1.0).contains(&p));
        }
    }

    #[test]
    fn test_training_reduces_loss_on_fixed_batch() {
        let mut net = toy_network();
        let mut rng = StdRng::seed_from_u64(99);
        let users = [0usize, 0, 1, 1, 2, 2, 3, 3];
        let items = [0usize, 1, 2, 3, 4, 5, 0, 2];
        let targets = Array1::from(vec![1.0, 0.0, 1.0, 0.0, 1.0, 0.0, 1.0, 0.0]);

        let first = net.train_batch(&users, &items, &targets, 0.01, &mut rng);
        let mut last = first;
        for _ in 0..60 {
            last = net.train_batch(&users, &items, &targets, 0.01, &mut rng);
        }
        assert!(last < first, "loss should fall: first={first} last={last}");
        assert!(last.is_finite());
    }

    #[test]
    fn test_deterministic_initialization() {
        let a = NcfNetwork::new(3, 3, 4, 4, &[8], 0.2, 42);
        let b = NcfNetwork::new(3, 3, 4, 4, &[8], 0.2, 42);
        let pa = a.predict(&[0, 1], &[1, 2]);
        let pb = b.predict(&[0, 1], &[1, 2]);
        for (x, y) in pa.iter().zip(pb.iter()) {
            assert_eq!(x, y);
        }
    }

    #[test]
    fn test_evaluate_finite() {
        let net = toy_network();
        let targets = Array1::from(vec![1.0, 0.0]);
        let loss = net.evaluate(&[0, 1], &[0, 1], &targets);
        assert!(loss.is_finite());
        assert!(loss >= 0.0);
    }
}
