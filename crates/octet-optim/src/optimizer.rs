//! Stateful optimizer over named parameters.
//!
//! [`BlockwiseOptimizer`] owns the moments of every parameter it has seen and
//! drives [`update_32bit`] or [`update_8bit_blockwise`] for each of them.
//! Small tensors keep `f32` moments; everything else is stored as blockwise
//! 8-bit codes with one absmax per block.

use std::collections::HashMap;
use std::sync::Arc;

use octet_core::{
    BlockSize, Element, ExecutionContext, MemoryStats, OctetError, OptimizerConfig,
    OptimizerFamily, PercentileClipConfig, Result, StateBits, StateCodecKind,
};
use octet_quant::{
    dequantize_buffer, estimate_quantiles, l2_norm, quantize_blockwise_into, sum_squares,
    BlockCodec, Codebook, Codec, QuantizedBuffer, RandomStream, Rounding,
    DEFAULT_QUANTILE_OFFSET,
};
use tracing::{debug, info, warn};

use crate::chunks::check_len;
use crate::{
    update_32bit, update_8bit_blockwise, ClipReport, GradientNormHistory, Hyperparams,
    QuantizedMoments, StepReport,
};

/// Moments of one parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamState {
    /// Full-precision moments.
    Full {
        /// First moment.
        state1: Vec<f32>,
        /// Second moment (Adam only).
        state2: Option<Vec<f32>>,
    },
    /// Blockwise 8-bit moments.
    Quantized {
        /// First moment.
        state1: QuantizedBuffer,
        /// Second moment (Adam only).
        state2: Option<QuantizedBuffer>,
    },
}

impl ParamState {
    fn zeros(config: &OptimizerConfig, n: usize) -> Self {
        let family = config.family;
        let full = config.state_bits == StateBits::ThirtyTwo || n < config.min_8bit_size;
        if full {
            return Self::Full {
                state1: vec![0.0; n],
                state2: family.needs_state2().then(|| vec![0.0; n]),
            };
        }
        let moment = |signed: bool| {
            let codec = match config.codec {
                StateCodecKind::Dynamic => Codec::dynamic(signed),
                StateCodecKind::Quantile => Codec::Static(Codebook::dynamic(signed)),
            };
            QuantizedBuffer::zeros(n, config.block_size, codec)
        };
        Self::Quantized {
            state1: moment(family.state1_signed()),
            state2: family
                .needs_state2()
                .then(|| moment(family.state2_signed())),
        }
    }

    /// Number of parameter elements.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Full { state1, .. } => state1.len(),
            Self::Quantized { state1, .. } => state1.len(),
        }
    }

    /// Whether the parameter has no elements.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the moments are stored in 8 bits.
    #[must_use]
    pub fn is_quantized(&self) -> bool {
        matches!(self, Self::Quantized { .. })
    }

    /// Number of moments kept.
    #[must_use]
    pub fn num_moments(&self) -> usize {
        let second = match self {
            Self::Full { state2, .. } => state2.is_some(),
            Self::Quantized { state2, .. } => state2.is_some(),
        };
        1 + usize::from(second)
    }

    /// Bytes used by the stored moments.
    #[must_use]
    pub fn memory_bytes(&self) -> usize {
        match self {
            Self::Full { state1, state2 } => {
                4 * (state1.len() + state2.as_ref().map_or(0, Vec::len))
            }
            Self::Quantized { state1, state2 } => {
                state1.memory_bytes() + state2.as_ref().map_or(0, QuantizedBuffer::memory_bytes)
            }
        }
    }

    /// First moment decoded to `f32`.
    ///
    /// # Errors
    ///
    /// Propagates dequantization failures.
    pub fn state1_f32(&self) -> Result<Vec<f32>> {
        match self {
            Self::Full { state1, .. } => Ok(state1.clone()),
            Self::Quantized { state1, .. } => dequantize_buffer(state1),
        }
    }

    /// Second moment decoded to `f32`, if the family keeps one.
    ///
    /// # Errors
    ///
    /// Propagates dequantization failures.
    pub fn state2_f32(&self) -> Result<Option<Vec<f32>>> {
        match self {
            Self::Full { state2, .. } => Ok(state2.clone()),
            Self::Quantized { state2, .. } => {
                state2.as_ref().map(dequantize_buffer::<f32>).transpose()
            }
        }
    }
}

/// Optimizer with per-parameter blockwise 8-bit state.
///
/// Call [`step`](Self::step) once per optimizer step, then
/// [`update`](Self::update) for each parameter, or use
/// [`update_all`](Self::update_all) to do both.
///
/// # Thread Safety
///
/// All updates take `&mut self`; kernels parallelize internally on the
/// execution context's pool.
#[derive(Debug)]
pub struct BlockwiseOptimizer {
    config: OptimizerConfig,
    ctx: Arc<ExecutionContext>,
    state: HashMap<String, ParamState>,
    step: u32,
    clipper: Option<GradientNormHistory>,
    stream: Option<RandomStream>,
    dither_offset: usize,
    gnorm_scale: f32,
}

impl BlockwiseOptimizer {
    /// Create an optimizer on the global execution context.
    ///
    /// # Errors
    ///
    /// Returns [`OctetError::Config`] for an invalid configuration, or an
    /// execution fault if the global pool cannot be built.
    pub fn new(config: OptimizerConfig) -> Result<Self> {
        Self::with_context(config, ExecutionContext::global()?)
    }

    /// Create an optimizer that launches its kernels on `ctx`.
    ///
    /// # Errors
    ///
    /// Returns [`OctetError::Config`] for an invalid configuration.
    pub fn with_context(config: OptimizerConfig, ctx: Arc<ExecutionContext>) -> Result<Self> {
        config.validate()?;
        let clipper = config
            .percentile_clipping
            .as_ref()
            .map(GradientNormHistory::from_config)
            .transpose()?;
        let stream = if config.rounding.stochastic {
            Some(RandomStream::with_len(
                config.rounding.seed,
                config.rounding.stream_len,
            )?)
        } else {
            None
        };

        info!(
            family = %config.family,
            state_bits = u8::from(config.state_bits),
            block_size = config.block_size.get(),
            codec = ?config.codec,
            clipping = clipper.is_some(),
            stochastic = stream.is_some(),
            threads = ctx.threads(),
            "created blockwise optimizer"
        );

        Ok(Self {
            config,
            ctx,
            state: HashMap::new(),
            step: 0,
            clipper,
            stream,
            dither_offset: 0,
            gnorm_scale: 1.0,
        })
    }

    /// Begin a new optimizer step.
    pub fn step(&mut self) {
        self.step = self.step.saturating_add(1);
        self.gnorm_scale = 1.0;
    }

    /// Feed this step's gradients to percentile clipping.
    ///
    /// The global L2 norm over all tensors is recorded, and every following
    /// [`update`](Self::update) of the step scales its gradient by the
    /// resulting factor. Returns `None` when clipping is disabled.
    ///
    /// # Errors
    ///
    /// Returns [`OctetError::InvalidArgument`] before the first step or for
    /// non-finite gradients.
    pub fn observe_gradients<'g, T, I>(&mut self, grads: I) -> Result<Option<ClipReport>>
    where
        T: Element,
        I: IntoIterator<Item = &'g [T]>,
    {
        let Some(clipper) = self.clipper.as_mut() else {
            return Ok(None);
        };
        if self.step == 0 {
            return Err(OctetError::InvalidArgument(
                "call step() before observing gradients".into(),
            ));
        }
        let grads: Vec<&[T]> = grads.into_iter().collect();
        let sq = self
            .ctx
            .launch("gradient_norm", || Ok(grads.iter().map(|g| sum_squares(g)).sum::<f64>()))?;
        let report = clipper.observe_norm(sq.sqrt() as f32, u64::from(self.step))?;
        self.gnorm_scale = report.scale;
        Ok(Some(report))
    }

    /// Apply the current step to one parameter.
    ///
    /// Moments are allocated zeroed the first time `name` is seen.
    ///
    /// # Errors
    ///
    /// Returns [`OctetError::InvalidArgument`] before the first
    /// [`step`](Self::step), [`OctetError::InvalidShape`] if `grad`, `param`
    /// and any existing state disagree in length, and kernel errors otherwise.
    pub fn update<T: Element>(
        &mut self,
        name: &str,
        grad: &[T],
        param: &mut [T],
    ) -> Result<StepReport> {
        if self.step == 0 {
            return Err(OctetError::InvalidArgument(
                "call step() before update()".into(),
            ));
        }
        let n = param.len();
        check_len("gradients", n, grad.len())?;
        if let Some(existing) = self.state.get(name) {
            check_len("optimizer state", existing.len(), n)?;
        }

        let family = self.config.family;
        let mut hp = Hyperparams::from_config(&self.config, self.step);
        hp.gnorm_scale = self.gnorm_scale;
        if hp.max_unorm > 0.0 {
            let param_ref: &[T] = param;
            hp.param_norm = self.ctx.launch("param_norm", || Ok(l2_norm(param_ref)))?;
        }

        let config = &self.config;
        let state = self.state.entry(name.to_owned()).or_insert_with(|| {
            let fresh = ParamState::zeros(config, n);
            debug!(
                param = name,
                elements = n,
                quantized = fresh.is_quantized(),
                bytes = fresh.memory_bytes(),
                "allocated optimizer state"
            );
            fresh
        });

        match state {
            ParamState::Full { state1, state2 } => update_32bit(
                &self.ctx,
                family,
                grad,
                param,
                state1,
                state2.as_deref_mut(),
                &hp,
            ),
            ParamState::Quantized { state1, state2 } => {
                let rounding = match &self.stream {
                    Some(stream) => Rounding::Stochastic {
                        stream,
                        offset: self.dither_offset,
                    },
                    None => Rounding::Nearest,
                };
                let (view1, codec1) = state1.parts_mut();
                let moments = QuantizedMoments {
                    state1: view1,
                    codec1,
                    state2: state2.as_mut().map(QuantizedBuffer::parts_mut),
                };
                let report = update_8bit_blockwise(
                    &self.ctx, family, grad, param, moments, &hp, rounding,
                )?;
                if let Some(stream) = &self.stream {
                    self.dither_offset = (self.dither_offset + 2 * n) % stream.len();
                }
                Ok(report)
            }
        }
    }

    /// Run a whole optimizer step over a set of parameters.
    ///
    /// Parameters are visited in sorted name order so stochastic rounding is
    /// reproducible; gradients without a matching parameter are ignored.
    ///
    /// # Errors
    ///
    /// Stops at the first failing parameter and returns its error.
    pub fn update_all<T: Element>(
        &mut self,
        gradients: &HashMap<String, Vec<T>>,
        parameters: &mut HashMap<String, Vec<T>>,
    ) -> Result<()> {
        self.step();

        let mut names: Vec<&String> = gradients
            .keys()
            .filter(|k| parameters.contains_key(*k))
            .collect();
        names.sort();

        self.observe_gradients(names.iter().map(|k| gradients[*k].as_slice()))?;
        for name in names {
            if let Some(param) = parameters.get_mut(name) {
                self.update(name, &gradients[name], param)?;
            }
        }
        Ok(())
    }

    /// Refit the quantile codebooks of every quantile-coded moment.
    ///
    /// Each moment is decoded, 256 quantiles are estimated from its current
    /// values, and it is requantized against the new codebook. A fit that
    /// would lose the moment's sign, or that collapses to a single value,
    /// keeps the previous codebook. Returns the number of moments refitted.
    ///
    /// # Errors
    ///
    /// Propagates estimation and quantization failures.
    pub fn refit_quantiles(&mut self) -> Result<usize> {
        let family = self.config.family;
        let mut names: Vec<&String> = self.state.keys().collect();
        names.sort();
        let names: Vec<String> = names.into_iter().cloned().collect();

        let mut refitted = 0;
        for name in names {
            let Some(ParamState::Quantized { state1, state2 }) = self.state.get_mut(&name) else {
                continue;
            };
            if refit_moment(&self.ctx, &name, state1, family.state1_signed())? {
                refitted += 1;
            }
            if let Some(state2) = state2 {
                if refit_moment(&self.ctx, &name, state2, family.state2_signed())? {
                    refitted += 1;
                }
            }
        }
        debug!(refitted, "refit quantile codebooks");
        Ok(refitted)
    }

    /// Memory used by all optimizer state.
    #[must_use]
    pub fn memory_usage(&self) -> MemoryStats {
        self.state
            .values()
            .fold(MemoryStats::default(), |mut stats, s| {
                stats.total_elements += s.len();
                stats.state_bytes += s.memory_bytes();
                stats.state_bytes_fp32 += 4 * s.len() * s.num_moments();
                stats
            })
    }

    /// State of one parameter.
    #[must_use]
    pub fn state(&self, name: &str) -> Option<&ParamState> {
        self.state.get(name)
    }

    /// Number of parameters with state.
    #[must_use]
    pub fn num_params(&self) -> usize {
        self.state.len()
    }

    /// Drop all state and restart from step 0.
    pub fn reset(&mut self) {
        self.state.clear();
        self.step = 0;
        self.dither_offset = 0;
        self.gnorm_scale = 1.0;
        if let Some(clipper) = &mut self.clipper {
            clipper.reset();
        }
    }

    /// Current learning rate.
    #[must_use]
    pub fn learning_rate(&self) -> f32 {
        self.config.lr
    }

    /// Set the learning rate (for schedulers).
    pub fn set_learning_rate(&mut self, lr: f32) {
        self.config.lr = lr;
    }

    /// Steps taken so far.
    #[must_use]
    pub fn current_step(&self) -> u32 {
        self.step
    }

    /// Gradient scale in effect for the current step.
    #[must_use]
    pub fn gnorm_scale(&self) -> f32 {
        self.gnorm_scale
    }

    /// Configuration.
    #[must_use]
    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }
}

fn refit_moment(
    ctx: &ExecutionContext,
    name: &str,
    buffer: &mut QuantizedBuffer,
    signed: bool,
) -> Result<bool> {
    if !matches!(buffer.codec, Codec::Static(_)) {
        return Ok(false);
    }
    let values: Vec<f32> = dequantize_buffer(buffer)?;
    if values.iter().all(|&v| v == 0.0) {
        return Ok(false);
    }
    let fitted = estimate_quantiles(&values, DEFAULT_QUANTILE_OFFSET, true)?;
    if fitted.max() == fitted.min() || (signed && !fitted.signed()) {
        warn!(
            param = name,
            min = fitted.min(),
            max = fitted.max(),
            "quantile fit unusable, keeping previous codebook"
        );
        return Ok(false);
    }
    buffer.codec = Codec::Static(fitted);
    let (view, codec) = buffer.parts_mut();
    quantize_blockwise_into(ctx, &values, codec, view, Rounding::Nearest)?;
    Ok(true)
}

/// Builder for [`BlockwiseOptimizer`].
#[derive(Debug, Clone)]
pub struct BlockwiseOptimizerBuilder {
    config: OptimizerConfig,
}

impl BlockwiseOptimizerBuilder {
    /// Start from the defaults of `family`.
    #[must_use]
    pub fn new(family: OptimizerFamily) -> Self {
        Self {
            config: OptimizerConfig::for_family(family),
        }
    }

    /// Start from an existing configuration.
    #[must_use]
    pub fn from_config(config: OptimizerConfig) -> Self {
        Self { config }
    }

    /// Set the learning rate.
    #[must_use]
    pub fn with_lr(mut self, lr: f32) -> Self {
        self.config.lr = lr;
        self
    }

    /// Set both betas.
    #[must_use]
    pub fn with_betas(mut self, beta1: f32, beta2: f32) -> Self {
        self.config.beta1 = beta1;
        self.config.beta2 = beta2;
        self
    }

    /// Set epsilon.
    #[must_use]
    pub fn with_eps(mut self, eps: f32) -> Self {
        self.config.eps = eps;
        self
    }

    /// Set L2 weight decay.
    #[must_use]
    pub fn with_weight_decay(mut self, weight_decay: f32) -> Self {
        self.config.weight_decay = weight_decay;
        self
    }

    /// Set the quantization block size.
    #[must_use]
    pub fn with_block_size(mut self, block_size: BlockSize) -> Self {
        self.config.block_size = block_size;
        self
    }

    /// Set the state precision.
    #[must_use]
    pub fn with_state_bits(mut self, bits: StateBits) -> Self {
        self.config.state_bits = bits;
        self
    }

    /// Set the 8-bit state codec.
    #[must_use]
    pub fn with_codec(mut self, codec: StateCodecKind) -> Self {
        self.config.codec = codec;
        self
    }

    /// Leave moments untouched where the gradient is exactly zero.
    #[must_use]
    pub fn with_skip_zeros(mut self, skip_zeros: bool) -> Self {
        self.config.skip_zeros = skip_zeros;
        self
    }

    /// Cap the update norm at `max_unorm` times the parameter norm.
    #[must_use]
    pub fn with_max_unorm(mut self, max_unorm: f32) -> Self {
        self.config.max_unorm = max_unorm;
        self
    }

    /// Tensors smaller than this keep 32-bit state.
    #[must_use]
    pub fn with_min_8bit_size(mut self, min_8bit_size: usize) -> Self {
        self.config.min_8bit_size = min_8bit_size;
        self
    }

    /// Enable percentile clipping.
    #[must_use]
    pub fn with_percentile_clipping(mut self, history: usize, percentile: f32) -> Self {
        self.config.percentile_clipping = Some(PercentileClipConfig {
            history,
            percentile,
        });
        self
    }

    /// Use nearest rounding when requantizing state.
    #[must_use]
    pub fn with_nearest_rounding(mut self) -> Self {
        self.config.rounding.stochastic = false;
        self
    }

    /// Seed the stochastic rounding stream.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.config.rounding.seed = seed;
        self
    }

    /// Build the optimizer.
    ///
    /// # Errors
    ///
    /// See [`BlockwiseOptimizer::new`].
    pub fn build(self) -> Result<BlockwiseOptimizer> {
        BlockwiseOptimizer::new(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn seeded(n: usize, seed: u64) -> Vec<f32> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..n).map(|_| rng.gen_range(-1.0f32..1.0)).collect()
    }

    #[test]
    fn test_builder() {
        let opt = BlockwiseOptimizerBuilder::new(OptimizerFamily::Adam)
            .with_lr(2e-4)
            .with_weight_decay(0.01)
            .build()
            .unwrap();
        assert!((opt.learning_rate() - 2e-4).abs() < 1e-10);
        assert_eq!(opt.config().block_size, BlockSize::B2048);
        assert_eq!(opt.current_step(), 0);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let result = BlockwiseOptimizerBuilder::new(OptimizerFamily::Adam)
            .with_lr(-1.0)
            .build();
        assert!(matches!(result, Err(OctetError::Config(_))));
    }

    #[test]
    fn test_update_requires_step() {
        let mut opt = BlockwiseOptimizerBuilder::new(OptimizerFamily::Adam).build().unwrap();
        let g = vec![0.1f32; 8];
        let mut p = vec![1.0f32; 8];
        assert!(matches!(
            opt.update("w", &g, &mut p),
            Err(OctetError::InvalidArgument(_))
        ));
        assert_eq!(opt.num_params(), 0);
    }

    #[test]
    fn test_small_tensors_keep_full_state() {
        let mut opt = BlockwiseOptimizerBuilder::new(OptimizerFamily::Adam).build().unwrap();
        let small = seeded(100, 1);
        let large = seeded(5000, 2);
        let mut p_small = vec![0.0f32; small.len()];
        let mut p_large = vec![0.0f32; large.len()];
        opt.step();
        opt.update("bias", &small, &mut p_small).unwrap();
        opt.update("weight", &large, &mut p_large).unwrap();

        assert!(!opt.state("bias").unwrap().is_quantized());
        assert!(opt.state("weight").unwrap().is_quantized());
        assert!(p_large.iter().zip(&large).all(|(p, g)| p * g < 0.0));
    }

    #[test]
    fn test_thirty_two_bit_config() {
        let mut opt = BlockwiseOptimizerBuilder::new(OptimizerFamily::Momentum)
            .with_state_bits(StateBits::ThirtyTwo)
            .build()
            .unwrap();
        let g = seeded(8192, 3);
        let mut p = vec![0.0f32; g.len()];
        opt.step();
        opt.update("w", &g, &mut p).unwrap();
        let state = opt.state("w").unwrap();
        assert!(!state.is_quantized());
        assert_eq!(state.state1_f32().unwrap(), g);
        assert_eq!(state.state2_f32().unwrap(), None);
    }

    #[test]
    fn test_memory_usage() {
        let mut opt = BlockwiseOptimizerBuilder::new(OptimizerFamily::Adam).build().unwrap();
        let g = seeded(8192, 4);
        let mut p = vec![0.0f32; g.len()];
        opt.step();
        opt.update("w", &g, &mut p).unwrap();
        let stats = opt.memory_usage();
        assert_eq!(stats.total_elements, 8192);
        assert_eq!(stats.state_bytes_fp32, 8 * 8192);
        assert_eq!(stats.state_bytes, 2 * (8192 + 4 * 4));
        assert!(stats.memory_saved() > 0.7);
    }

    #[test]
    fn test_length_mismatch_allocates_nothing() {
        let mut opt = BlockwiseOptimizerBuilder::new(OptimizerFamily::Adagrad).build().unwrap();
        opt.step();
        let g = vec![0.1f32; 10];
        let mut p = vec![1.0f32; 11];
        assert!(matches!(
            opt.update("w", &g, &mut p),
            Err(OctetError::InvalidShape { .. })
        ));
        assert_eq!(opt.num_params(), 0);

        let mut p = vec![1.0f32; 10];
        opt.update("w", &g, &mut p).unwrap();
        let mut longer = vec![1.0f32; 12];
        let g12 = vec![0.1f32; 12];
        assert!(opt.update("w", &g12, &mut longer).is_err());
    }

    #[test]
    fn test_same_seed_same_trajectory() {
        let run = |seed| {
            let mut opt = BlockwiseOptimizerBuilder::new(OptimizerFamily::Adam)
                .with_seed(seed)
                .build()
                .unwrap();
            let mut params = HashMap::from([
                ("a".to_string(), vec![0.5f32; 6000]),
                ("b".to_string(), vec![-0.5f32; 4100]),
            ]);
            for step in 0..3 {
                let grads = HashMap::from([
                    ("a".to_string(), seeded(6000, 10 + step)),
                    ("b".to_string(), seeded(4100, 20 + step)),
                ]);
                opt.update_all(&grads, &mut params).unwrap();
            }
            (params, opt.state("a").cloned())
        };
        assert_eq!(run(7), run(7));
    }

    #[test]
    fn test_global_percentile_clipping() {
        let mut opt = BlockwiseOptimizerBuilder::new(OptimizerFamily::Momentum)
            .with_percentile_clipping(3, 50.0)
            .build()
            .unwrap();
        let small = vec![0.1f32; 16];
        for _ in 0..3 {
            opt.step();
            let r = opt.observe_gradients([small.as_slice()]).unwrap().unwrap();
            assert_eq!(r.scale, 1.0);
        }
        opt.step();
        let big = vec![10.0f32; 16];
        let r = opt
            .observe_gradients([big.as_slice(), small.as_slice()])
            .unwrap()
            .unwrap();
        assert!(r.scale < 0.02);
        assert_eq!(opt.gnorm_scale(), r.scale);

        opt.step();
        assert_eq!(opt.gnorm_scale(), 1.0);
    }

    #[test]
    fn test_quantile_refit() {
        let mut opt = BlockwiseOptimizerBuilder::new(OptimizerFamily::Adam)
            .with_codec(StateCodecKind::Quantile)
            .with_nearest_rounding()
            .build()
            .unwrap();
        let n = 4096;
        let mut p = vec![0.0f32; n];
        for step in 0..2 {
            opt.step();
            opt.update("w", &seeded(n, 30 + step), &mut p).unwrap();
        }
        let before = opt.state("w").unwrap().state1_f32().unwrap();
        assert_eq!(opt.refit_quantiles().unwrap(), 2);

        let state = opt.state("w").unwrap();
        let after = state.state1_f32().unwrap();
        let scale = before.iter().fold(0.0f32, |m, x| m.max(x.abs()));
        for (a, b) in after.iter().zip(&before) {
            assert!((a - b).abs() < 0.1 * scale);
        }
        match state {
            ParamState::Quantized { state1, .. } => {
                assert_ne!(state1.codec, Codec::Static(Codebook::dynamic(true)));
            }
            ParamState::Full { .. } => panic!("expected quantized state"),
        }

        // dynamic codecs are never refitted
        let mut dynamic = BlockwiseOptimizerBuilder::new(OptimizerFamily::Adam).build().unwrap();
        dynamic.step();
        dynamic.update("w", &seeded(n, 40), &mut p).unwrap();
        assert_eq!(dynamic.refit_quantiles().unwrap(), 0);
    }
}
