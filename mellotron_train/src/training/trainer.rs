//! Mellotron trainer implementation.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use burn::module::AutodiffModule;
use burn::optim::Optimizer;
use burn::tensor::backend::AutodiffBackend;
use burn::tensor::ElementConversion;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use mellotron_core::{IndexSampler, ReductionWindowScheduler, Shard, WindowSettings};

use crate::config::TrainingConfig;
use crate::data::{DebugSubset, SampleDataset, SampleLoader};
use crate::error::{Result, TrainError};
use crate::loss::Tacotron2Loss;
use crate::model::{ModelInputs, ModelOutput, ModelTargets, TextToMelModel};

use super::batch::{Collate, TextMelBatch};
use super::checkpoint::{self, load_checkpoint, record_from_bytes, record_to_bytes, Checkpoint};
use super::distributed::Collective;
use super::logging::{LogRecordSink, LogSink};
use super::metrics::{StepMetrics, ValidationReport};
use super::sampling::{choose_speaker, run_sample_inference, SampleLogger, UtteranceSource, Vocoder};
use super::strategy::ExecutionStrategy;
use super::validation::run_validation;

#[derive(Default)]
struct DistributedSetup {
    rank: Option<usize>,
    world_size: Option<usize>,
    collective: Option<Arc<dyn Collective>>,
}

/// Drives training of a [`TextToMelModel`].
///
/// Per epoch: adjust the reduction window (rebuilding the loader when it
/// changes), run every batch through forward, loss and
/// [`ExecutionStrategy::backward_and_step`], save a checkpoint every
/// `epochs_per_checkpoint` epochs, then validate unless in debug mode.
///
/// The trainer's mutable state is limited to the global step, the
/// reduction-window cursor, the learning rate and the epoch to resume from.
pub struct Trainer<B: AutodiffBackend> {
    config: TrainingConfig,
    device: B::Device,
    strategy: ExecutionStrategy,
    distributed: DistributedSetup,
    scheduler: ReductionWindowScheduler,
    loss: Tacotron2Loss,
    logger: SampleLogger,
    utterances: Option<Box<dyn UtteranceSource>>,
    rng: StdRng,
    global_step: usize,
    start_epoch: usize,
    learning_rate: f64,
}

impl<B: AutodiffBackend> Trainer<B> {
    /// Create a trainer. Fails with [`TrainError::Configuration`] for an
    /// invalid config.
    pub fn new(config: TrainingConfig, device: B::Device) -> Result<Self> {
        config.validate()?;

        let scheduler = ReductionWindowScheduler::new(config.schedule()?, config.initial_window());
        Ok(Self {
            strategy: ExecutionStrategy::from_config(&config, None),
            distributed: DistributedSetup::default(),
            scheduler,
            loss: Tacotron2Loss::new(config.pos_weight),
            logger: SampleLogger::new(Box::new(LogRecordSink), config.sample_rate),
            utterances: None,
            rng: StdRng::seed_from_u64(config.seed),
            global_step: 0,
            start_epoch: 0,
            learning_rate: config.learning_rate,
            device,
            config,
        })
    }

    /// Send events to `sink`.
    pub fn with_sink(mut self, sink: impl LogSink + 'static) -> Self {
        self.logger.set_sink(Box::new(sink));
        self
    }

    /// Synthesize audio samples with `vocoder`.
    pub fn with_vocoder(mut self, vocoder: impl Vocoder + 'static) -> Self {
        self.logger.set_vocoder(Box::new(vocoder));
        self
    }

    /// Decode utterances from `source` for sampled inference.
    pub fn with_utterances(mut self, source: impl UtteranceSource + 'static) -> Self {
        self.utterances = Some(Box::new(source));
        self
    }

    /// Join a data-parallel group.
    ///
    /// Used when `distributed_run` is set. Both `rank` and `world_size` must
    /// be known and agree with `collective`; this is checked when training
    /// starts.
    pub fn with_distributed(
        mut self,
        rank: Option<usize>,
        world_size: Option<usize>,
        collective: Arc<dyn Collective>,
    ) -> Self {
        self.distributed = DistributedSetup {
            rank,
            world_size,
            collective: Some(collective),
        };
        self
    }

    /// Get the training configuration.
    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    /// The execution strategy in use.
    pub fn strategy(&self) -> &ExecutionStrategy {
        &self.strategy
    }

    /// Optimizer steps taken, including those restored from a checkpoint.
    pub fn global_step(&self) -> usize {
        self.global_step
    }

    /// Current learning rate.
    pub fn learning_rate(&self) -> f64 {
        self.learning_rate
    }

    /// Epoch training starts or resumes at.
    pub fn start_epoch(&self) -> usize {
        self.start_epoch
    }

    /// Active frames-per-step and batch size.
    pub fn active_window(&self) -> WindowSettings {
        self.scheduler.active()
    }

    /// Restore training state from the checkpoint at `path`.
    ///
    /// Model weights are required; optimizer state, epoch, learning rate and
    /// global step are each restored when present. Layers named in
    /// `ignore_layers` keep their current weights.
    pub fn warm_start<M, O>(&mut self, path: &Path, model: M, optimizer: O) -> Result<(M, O)>
    where
        M: AutodiffModule<B> + TextToMelModel<B>,
        O: Optimizer<M, B>,
    {
        let checkpoint = load_checkpoint(path)?;

        let model = model.from_pretrained(&checkpoint.model, &self.device, &self.config.ignore_layers)?;
        let optimizer = match checkpoint.optimizer {
            Some(bytes) => optimizer.load_record(record_from_bytes::<B, O::Record>(bytes, &self.device)?),
            None => optimizer,
        };
        if let Some(iteration) = checkpoint.iteration {
            self.start_epoch = iteration;
        }
        if let Some(learning_rate) = checkpoint.learning_rate {
            self.learning_rate = learning_rate;
        }
        if let Some(global_step) = checkpoint.global_step {
            self.global_step = global_step;
            log::info!("Adjusted global step to {global_step}");
        }

        log::info!(
            "Warm-started from {:?}: epoch {}, learning rate {:.2e}",
            path,
            self.start_epoch,
            self.learning_rate
        );
        Ok((model, optimizer))
    }

    /// Train `model` for the configured number of epochs.
    ///
    /// Returns the trained model. Any error other than a synthesis failure
    /// during sample logging ends training and is returned. In a
    /// data-parallel run the error also aborts the collective, so the other
    /// workers fail instead of waiting on this one.
    pub fn fit<M, O, D, V>(&mut self, model: M, optimizer: O, train_set: &D, val_set: &V) -> Result<M>
    where
        M: AutodiffModule<B> + TextToMelModel<B>,
        M::InnerModule: TextToMelModel<B::InnerBackend>,
        O: Optimizer<M, B>,
        D: SampleDataset + ?Sized,
        V: SampleDataset + ?Sized,
    {
        self.setup_distributed()?;

        let result = self.run_epochs(model, optimizer, train_set, val_set);
        if let Err(err) = &result {
            if let Some(collective) = self.strategy.collective() {
                log::error!("Rank {} stopping: {err}", collective.rank());
                collective.abort(&err.to_string());
            }
        }
        result
    }

    fn run_epochs<M, O, D, V>(&mut self, model: M, optimizer: O, train_set: &D, val_set: &V) -> Result<M>
    where
        M: AutodiffModule<B> + TextToMelModel<B>,
        M::InnerModule: TextToMelModel<B::InnerBackend>,
        O: Optimizer<M, B>,
        D: SampleDataset + ?Sized,
        V: SampleDataset + ?Sized,
    {
        let (mut model, mut optimizer) = match self.config.warm_start_name.clone() {
            Some(name) => self.warm_start(Path::new(&name), model, optimizer)?,
            None => (model, optimizer),
        };

        let limit = if self.config.debug {
            self.config.debug_size()
        } else {
            usize::MAX
        };
        let train_set = DebugSubset::new(train_set, limit);

        let mut settings = self.scheduler.active();
        model.set_frames_per_step(settings.frames_per_step);
        let mut loader = self.train_loader(settings)?;

        log::info!(
            "Training epochs {}..{} on {} samples (rank {} of {})",
            self.start_epoch,
            self.config.epochs,
            train_set.len(),
            self.strategy.rank(),
            self.strategy.world_size()
        );

        for epoch in self.start_epoch..self.config.epochs {
            if let Some(next) = self.scheduler.adjust(self.global_step) {
                log::info!(
                    "Adjusting frames per step from {} to {} (batch size {})",
                    settings.frames_per_step,
                    next.frames_per_step,
                    next.batch_size
                );
                settings = next;
                model.set_frames_per_step(settings.frames_per_step);
                loader = self.train_loader(settings)?;
            }
            loader.set_epoch(epoch);

            let device = self.device.clone();
            let move_to_device = !loader.collate().places_on_device();
            for batch in loader.batches::<B, _>(&train_set, &device) {
                let mut batch = batch?;
                if move_to_device {
                    batch = batch.to_device(&device);
                }
                model = self.train_step(model, &mut optimizer, batch, epoch)?;
            }

            if epoch % self.config.epochs_per_checkpoint == 0 {
                self.save_checkpoint(&model, &optimizer, epoch)?;
            }

            if self.config.debug {
                continue;
            }
            self.validate(&model, val_set)?;
        }

        Ok(model)
    }

    /// Run a validation pass over `val_set` with the current collator and
    /// batch size, then log its means and one sample of the final batch.
    pub fn validate<M, V>(&mut self, model: &M, val_set: &V) -> Result<Option<ValidationReport>>
    where
        M: AutodiffModule<B> + TextToMelModel<B>,
        M::InnerModule: TextToMelModel<B::InnerBackend>,
        V: SampleDataset + ?Sized,
    {
        let settings = self.scheduler.active();
        let mut sampler = IndexSampler::sequential();
        if let Some(shard) = self.shard()? {
            sampler = sampler.with_shard(shard);
        }
        let loader = SampleLoader::new(sampler, settings.batch_size, self.collate(settings));

        let inner = model.valid();
        let outcome = run_validation::<B::InnerBackend, _, _>(
            &inner,
            val_set,
            &loader,
            &self.loss,
            &self.strategy,
            &self.device,
        )?;

        if !self.strategy.is_primary() {
            return Ok(outcome.report);
        }
        match &outcome.report {
            Some(report) => report.log_scalars(&mut self.logger, self.global_step),
            None => log::warn!("Validation set produced no batches"),
        }
        if let Some(last) = &outcome.last {
            let [batch_size, _, _] = last.targets.mel.dims();
            let item = self.rng.random_range(0..batch_size.max(1));
            self.logger.log_batch_sample(
                "val",
                self.global_step,
                item,
                inner.frames_per_step(),
                &last.inputs,
                &last.targets,
                &last.output,
            )?;
        }
        Ok(outcome.report)
    }

    /// Save a checkpoint named after `epoch`.
    ///
    /// Returns the written path, or `None` on non-primary workers, which
    /// never write.
    pub fn save_checkpoint<M, O>(&self, model: &M, optimizer: &O, epoch: usize) -> Result<Option<PathBuf>>
    where
        M: AutodiffModule<B> + TextToMelModel<B>,
        O: Optimizer<M, B>,
    {
        if !self.strategy.is_primary() {
            return Ok(None);
        }

        let checkpoint = Checkpoint::new(model.state_dict()?)
            .with_optimizer(record_to_bytes::<B, O::Record>(optimizer.to_record())?)
            .with_iteration(epoch)
            .with_learning_rate(self.learning_rate)
            .with_global_step(self.global_step);

        checkpoint::save_checkpoint(
            Path::new(&self.config.checkpoint_path),
            &self.config.checkpoint_name(epoch),
            &checkpoint,
        )
        .map(Some)
    }

    fn setup_distributed(&mut self) -> Result<()> {
        if !self.config.distributed_run {
            if self.distributed.collective.is_some() {
                log::warn!("Collective supplied but distributed_run is off; training on one worker");
            }
            self.strategy = ExecutionStrategy::from_config(&self.config, None);
            return Ok(());
        }

        let rank = self
            .distributed
            .rank
            .ok_or_else(|| TrainError::configuration("distributed_run requires a rank"))?;
        let world_size = self
            .distributed
            .world_size
            .ok_or_else(|| TrainError::configuration("distributed_run requires a world size"))?;
        let collective = self
            .distributed
            .collective
            .clone()
            .ok_or_else(|| TrainError::configuration("distributed_run requires a collective"))?;

        Shard::new(rank, world_size).map_err(|e| TrainError::configuration(e.to_string()))?;
        if collective.rank() != rank || collective.world_size() != world_size {
            return Err(TrainError::configuration(format!(
                "collective is rank {} of {}, configured rank {rank} of {world_size}",
                collective.rank(),
                collective.world_size()
            )));
        }

        self.strategy = ExecutionStrategy::from_config(&self.config, Some(collective));
        log::info!("Initialized distributed training: rank {rank} of {world_size}");
        Ok(())
    }

    fn shard(&self) -> Result<Option<Shard>> {
        if !self.strategy.is_distributed() {
            return Ok(None);
        }
        Ok(Some(Shard::new(self.strategy.rank(), self.strategy.world_size())?))
    }

    fn collate(&self, settings: WindowSettings) -> Collate {
        Collate::new(settings.frames_per_step).with_device_placement(self.config.collate_on_device)
    }

    fn train_loader(&self, settings: WindowSettings) -> Result<SampleLoader> {
        let mut sampler = IndexSampler::shuffled(self.config.seed);
        if let Some(shard) = self.shard()? {
            sampler = sampler.with_shard(shard);
        }
        Ok(SampleLoader::new(sampler, settings.batch_size, self.collate(settings)))
    }

    fn train_step<M, O>(&mut self, model: M, optimizer: &mut O, batch: TextMelBatch<B>, epoch: usize) -> Result<M>
    where
        M: AutodiffModule<B> + TextToMelModel<B>,
        M::InnerModule: TextToMelModel<B::InnerBackend>,
        O: Optimizer<M, B>,
    {
        let start = Instant::now();
        self.global_step += 1;

        let (inputs, targets) = model.parse_batch(&batch)?;
        let output = model.forward(inputs.clone());
        let losses = self.loss.forward(&output, &targets);

        let mut reduced = [
            losses.mel_loss.clone().into_scalar().elem::<f32>(),
            losses.gate_loss.clone().into_scalar().elem::<f32>(),
        ];
        self.strategy.reduce(&mut reduced)?;

        let (model, report) = self.strategy.backward_and_step(
            losses.total(),
            model,
            optimizer,
            self.learning_rate,
            self.config.grad_clip_thresh,
            self.global_step,
        )?;

        let metrics = StepMetrics {
            step: self.global_step,
            epoch,
            mel_loss: reduced[0],
            gate_loss: reduced[1],
            grad_norm: report.grad_norm,
            learning_rate: self.learning_rate,
            duration_secs: start.elapsed().as_secs_f32(),
            applied: report.applied,
        };

        if self.strategy.is_primary() {
            self.log_training(&model, &inputs, &targets, &output, &metrics)?;
        }
        Ok(model)
    }

    fn log_training<M>(
        &mut self,
        model: &M,
        inputs: &ModelInputs<B>,
        targets: &ModelTargets<B>,
        output: &ModelOutput<B>,
        metrics: &StepMetrics,
    ) -> Result<()>
    where
        M: AutodiffModule<B> + TextToMelModel<B>,
        M::InnerModule: TextToMelModel<B::InnerBackend>,
    {
        metrics.log_scalars(&mut self.logger);
        metrics.log("train");

        if metrics.step % self.config.steps_per_sample != 0 {
            return Ok(());
        }

        let [batch_size, _, _] = targets.mel.dims();
        let item = self.rng.random_range(0..batch_size.max(1));
        self.logger.log_batch_sample(
            "train",
            metrics.step,
            item,
            model.frames_per_step(),
            inputs,
            targets,
            output,
        )?;
        self.sample_inference(model)
    }

    fn sample_inference<M>(&mut self, model: &M) -> Result<()>
    where
        M: AutodiffModule<B> + TextToMelModel<B>,
        M::InnerModule: TextToMelModel<B::InnerBackend>,
    {
        let Some(source) = &self.utterances else {
            return Ok(());
        };
        let tokens = source.utterance();
        if tokens.is_empty() {
            return Ok(());
        }

        let speaker = choose_speaker(
            self.config.sample_inference_speaker_ids.as_deref(),
            self.config.n_speakers,
            &mut self.rng,
        );
        let inner = model.valid();
        let output = run_sample_inference::<B::InnerBackend, _>(
            &inner,
            &tokens,
            speaker,
            self.config.include_f0,
            &self.device,
        );
        self.logger.log_inference(self.global_step, &output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::{Autodiff, NdArray};
    use mellotron_core::ReductionWindow;

    type TestBackend = Autodiff<NdArray>;

    #[test]
    fn test_new_rejects_invalid_config() {
        let config = TrainingConfig::new().with_batch_size(0);
        assert!(matches!(
            Trainer::<TestBackend>::new(config, Default::default()),
            Err(TrainError::Configuration { .. })
        ));
    }

    #[test]
    fn test_initial_state() {
        let config = TrainingConfig::new()
            .with_learning_rate(5e-4)
            .with_n_frames_per_step_initial(3)
            .with_reduction_window_schedule(vec![
                ReductionWindow::until(3, 8, 100),
                ReductionWindow::open(1, 4),
            ]);
        let trainer = Trainer::<TestBackend>::new(config, Default::default()).unwrap();

        assert_eq!(trainer.global_step(), 0);
        assert_eq!(trainer.learning_rate(), 5e-4);
        assert_eq!(trainer.active_window().frames_per_step, 3);
        assert_eq!(trainer.active_window().batch_size, 32);
        assert!(!trainer.strategy().is_distributed());
    }
}
