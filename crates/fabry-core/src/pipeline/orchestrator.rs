use std::sync::Arc;
use std::thread;
use std::time::Instant;

use ndarray::{Array2, ArrayD};
use tracing::{error, info, warn};

use crate::barycenter::wrapped_phase_map;
use crate::cache::{Cacheable, ResultCache, StageKey};
use crate::calibration::{calibrate_wavelength, CalibrationMode, CalibrationReport};
use crate::continuum::{continuum_map, discontinuum};
use crate::cube::{Cube, NoiseMask, OrderMap, PlaneMap};
use crate::error::Result;
use crate::fit::{fit_airy, fit_paraboloid, AiryFitResult, AirySettings, FitTicket, FitterQueue};
use crate::fsr::{border_distance_map, order_map, unwrap_phase, OrderMapSettings};
use crate::noise::noise_mask;
use crate::overscan::apply_overscan;
use crate::rings::{find_rings, RingCenter, RingGeometry};

use super::config::PipelineConfig;
use super::scheduler::StageScheduler;
use super::types::{
    Diagnostic, NoOpReporter, PipelineOutput, PipelineStage, PipelineStatus, ProgressReporter,
};

/// Look `key` up in `cache`, computing and storing the value on a miss.
fn memo<T, F>(cache: Option<&ResultCache>, key: StageKey, compute: F) -> Result<Arc<T>>
where
    T: Cacheable,
    F: FnOnce() -> Result<T>,
{
    match cache {
        Some(cache) => cache.get_or_try_insert(key, compute),
        None => compute().map(Arc::new),
    }
}

/// First stage without a fallback whose product is missing.
fn failed_stage(out: &PipelineOutput) -> PipelineStage {
    if out.continuum.is_none() {
        PipelineStage::Continuum
    } else if out.discontinuum.is_none() {
        PipelineStage::Discontinuum
    } else if out.wrapped.is_none() {
        PipelineStage::Barycenter
    } else if out.noise.is_none() {
        PipelineStage::Noise
    } else if out.order.is_none() {
        PipelineStage::OrderMap
    } else if out.unwrapped.is_none() {
        PipelineStage::Unwrap
    } else {
        PipelineStage::Calibration
    }
}

/// The high-resolution phase-map pipeline.
///
/// Holds the configuration, an optional result cache shared between runs,
/// and the single-worker queue through which all numerical fits pass.
pub struct PhaseMapPipeline {
    config: PipelineConfig,
    cache: Option<Arc<ResultCache>>,
    reporter: Arc<dyn ProgressReporter>,
    fitter: FitterQueue,
}

impl PhaseMapPipeline {
    pub fn new(config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            cache: None,
            reporter: Arc::new(NoOpReporter),
            fitter: FitterQueue::spawn()?,
        })
    }

    pub fn with_cache(mut self, cache: Arc<ResultCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn ProgressReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run on an array of unknown dimensionality; anything but 3-D yields an empty output.
    pub fn run_dyn(&self, data: ArrayD<f32>) -> PipelineOutput {
        match Cube::from_dyn(data) {
            Ok(cube) => self.run(&cube),
            Err(e) => {
                error!(error = %e, "Input is not a usable cube");
                PipelineOutput::new(PipelineStatus::InvalidInput)
            }
        }
    }

    /// Run every stage on `cube`.
    pub fn run(&self, cube: &Cube) -> PipelineOutput {
        let started = Instant::now();
        let (p, h, w) = cube.shape();
        info!(planes = p, rows = h, cols = w, hash = %cube.hash().short(), "Starting phase-map pipeline");

        let overscan = &self.config.algorithms.overscan;
        let key = StageKey::new("overscan", &[cube.hash()], |k| {
            k.tag(&overscan.to_string());
        });
        let trimmed = match self.stage(PipelineStage::Overscan, || {
            memo(self.cache.as_deref(), key, || apply_overscan(cube, overscan))
        }) {
            Ok(trimmed) => trimmed,
            Err(e) => {
                error!(error = %e, "Cube rejected by the overscan step");
                return PipelineOutput::new(PipelineStatus::InvalidInput);
            }
        };

        let mut out = PipelineOutput::new(PipelineStatus::Complete);
        out.trimmed = Some(Arc::clone(&trimmed));
        if let Err(e) = self.run_stages(&trimmed, &mut out) {
            error!(error = %e, "Pipeline stopped");
            out.status = PipelineStatus::Failed;
            out.diagnostics.push(Diagnostic::StageFailed {
                stage: failed_stage(&out),
                reason: e.to_string(),
            });
        }
        out.elapsed = started.elapsed();

        info!(
            status = ?out.status,
            diagnostics = out.diagnostics.len(),
            elapsed_ms = out.elapsed.as_millis() as u64,
            "Pipeline finished"
        );
        out
    }

    /// Report and time one stage run on the calling thread.
    fn stage<T>(&self, stage: PipelineStage, job: impl FnOnce() -> Result<T>) -> Result<T> {
        self.reporter.begin_stage(stage, None);
        let started = Instant::now();
        let result = job();
        self.reporter.finish_stage(stage);
        match &result {
            Ok(_) => info!(
                stage = stage.slug(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Stage complete"
            ),
            Err(e) => warn!(stage = stage.slug(), error = %e, "Stage failed"),
        }
        result
    }

    fn run_stages(&self, trimmed: &Arc<Cube>, out: &mut PipelineOutput) -> Result<()> {
        let cfg = &self.config;
        let planes = trimmed.planes();
        let period = planes as f64;

        thread::scope(|scope| -> Result<()> {
            let scheduler = StageScheduler::new(scope);

            // S6 runs beside S2-S5.
            let rings_task = scheduler.spawn(PipelineStage::Rings, move || {
                self.stage(PipelineStage::Rings, || self.rings(trimmed))
            });
            let phase = self.phase_and_noise(trimmed, out);
            let rings = rings_task.and_then(|task| task.join());
            let (wrapped, noise) = phase?;

            let rings = match rings {
                Ok(rings) => Some(rings),
                Err(e) => {
                    warn!(error = %e, "Ring finder failed; continuing without rings");
                    out.diagnostics.push(Diagnostic::StageFailed {
                        stage: PipelineStage::Rings,
                        reason: e.to_string(),
                    });
                    None
                }
            };
            out.rings = rings.clone();

            if let Some(rings) = &rings {
                if rings.center_fallback {
                    out.diagnostics.push(Diagnostic::CenterFallback);
                }
                if let Some(check) = &cfg.verify_center {
                    let expected = check.expected();
                    let error = rings.center.distance_to(&expected);
                    if error > check.max_pixel_error {
                        error!(
                            detected = %rings.center,
                            expected = %expected,
                            error,
                            "Ring center verification failed"
                        );
                        out.diagnostics.push(Diagnostic::CenterVerificationFailed {
                            detected: rings.center,
                            expected,
                            error,
                            tolerance: check.max_pixel_error,
                        });
                        out.status = PipelineStatus::CenterVerificationFailed;
                        return Ok(());
                    }
                }
            }

            // S7 goes to the fitter queue; S8 runs on a stage thread meanwhile.
            let found = rings.as_ref().map_or(0, |r| r.ring_count());
            let fit_requested = !cfg.dont_fit;
            let required = if fit_requested {
                cfg.min_rings.max(2)
            } else {
                cfg.min_rings
            };
            if found < required {
                warn!(found, required, "Insufficient rings");
                out.diagnostics.push(Diagnostic::InsufficientRings { found, required });
            }
            let airy_ticket = match &rings {
                Some(rings) if fit_requested && found >= required => {
                    match self.submit_airy(trimmed, rings) {
                        Ok(ticket) => Some(ticket),
                        Err(e) => {
                            out.diagnostics.push(Diagnostic::AiryFitFailed {
                                reason: e.to_string(),
                            });
                            None
                        }
                    }
                }
                _ => None,
            };

            let border_task = rings.as_ref().map(|rings| {
                let (wrapped, rings, noise) = (Arc::clone(&wrapped), Arc::clone(rings), Arc::clone(&noise));
                scheduler.spawn(PipelineStage::BorderMap, move || {
                    self.stage(PipelineStage::BorderMap, || self.border(&wrapped, &rings, &noise, period))
                })
            });

            let airy = airy_ticket.and_then(|ticket| {
                let result = ticket.wait().and_then(|r| r);
                self.reporter.finish_stage(PipelineStage::AiryFit);
                match result {
                    Ok(airy) => Some(airy),
                    Err(e) => {
                        warn!(error = %e, "Airy fit failed; continuing without fits");
                        out.diagnostics.push(Diagnostic::AiryFitFailed {
                            reason: e.to_string(),
                        });
                        None
                    }
                }
            });
            if let Some(airy) = &airy {
                out.focal_length_um = airy.focal_length(cfg.pixel_size);
                if let Some(focal) = out.focal_length_um {
                    info!(focal_length_mm = focal / 1000.0, pixel_size = cfg.pixel_size, "Camera focal length");
                }
                let stuck: Vec<usize> = airy
                    .converged
                    .iter()
                    .enumerate()
                    .filter_map(|(k, &ok)| (!ok).then_some(k))
                    .collect();
                if !stuck.is_empty() {
                    out.diagnostics.push(Diagnostic::AiryPlanesNotConverged { planes: stuck });
                }
                if !cfg.channel_subset.is_empty() {
                    match airy.substitute(trimmed, &cfg.channel_subset) {
                        Ok(cube) => out.substituted = Some(Arc::new(cube)),
                        Err(e) => out.diagnostics.push(Diagnostic::StageFailed {
                            stage: PipelineStage::AiryFit,
                            reason: e.to_string(),
                        }),
                    }
                }
            }
            out.airy = airy.clone();

            let border = match border_task {
                Some(task) => match task.and_then(|t| t.join()) {
                    Ok(border) => Some(border),
                    Err(e) => {
                        out.diagnostics.push(Diagnostic::StageFailed {
                            stage: PipelineStage::BorderMap,
                            reason: e.to_string(),
                        });
                        None
                    }
                },
                None => None,
            };
            out.border = border.clone();

            // S9, S10.
            let direction = airy
                .as_ref()
                .and_then(|a| a.direction())
                .or(cfg.scan_direction)
                .unwrap_or_default();
            let settings = OrderMapSettings {
                mapper: cfg.algorithms.fsr,
                direction,
                border_thickness: cfg.fsr_border_thickness,
                period,
            };
            let order = self.stage(PipelineStage::OrderMap, || match (&rings, &border) {
                (Some(rings), Some(border)) if !rings.radii.is_empty() => {
                    let key = StageKey::new("order", &[wrapped.hash(), border.hash(), rings.hash()], |k| {
                        k.tag(settings.mapper.name())
                            .tag(&settings.direction.to_string())
                            .opt_f64(settings.border_thickness)
                            .f64(period);
                    });
                    memo(self.cache.as_deref(), key, || {
                        order_map(&wrapped, border, rings.center, &rings.radii, &settings)
                    })
                }
                _ => {
                    warn!("No ring radii; using a zero order map");
                    out.diagnostics.push(Diagnostic::NoRingsForOrderMap);
                    Ok(Arc::new(OrderMap::new(Array2::zeros(wrapped.dim()))))
                }
            })?;
            out.order = Some(Arc::clone(&order));

            let key = StageKey::new("unwrap", &[wrapped.hash(), order.hash()], |k| {
                k.f64(period);
            });
            let unwrapped = self.stage(PipelineStage::Unwrap, || {
                memo(self.cache.as_deref(), key, || unwrap_phase(&wrapped, &order, period))
            })?;
            out.unwrapped = Some(Arc::clone(&unwrapped));

            if cfg.unwrapped_only {
                out.status = PipelineStatus::UnwrappedOnly;
                return Ok(());
            }

            // S11 on the fitter queue beside S12.
            let center = rings.as_ref().map(|r| r.center);
            let saturated = noise.is_saturated();
            let parabola_ticket = match (airy.is_some(), center) {
                (false, _) => {
                    if fit_requested {
                        out.diagnostics.push(Diagnostic::ParabolicFitSkipped {
                            reason: "no Airy fit".into(),
                        });
                    }
                    None
                }
                (true, _) if saturated => {
                    out.diagnostics.push(Diagnostic::ParabolicFitSkipped {
                        reason: "noise mask covers every pixel".into(),
                    });
                    None
                }
                (true, None) => None,
                (true, Some(center)) => {
                    let (unwrapped, noise) = (Arc::clone(&unwrapped), Arc::clone(&noise));
                    self.reporter.begin_stage(PipelineStage::ParabolicFit, None);
                    match self.fitter.submit(PipelineStage::ParabolicFit.slug(), move || {
                        fit_paraboloid(&unwrapped, &noise, center)
                    }) {
                        Ok(ticket) => Some(ticket),
                        Err(e) => {
                            out.diagnostics.push(Diagnostic::ParabolicFitSkipped {
                                reason: e.to_string(),
                            });
                            None
                        }
                    }
                }
            };

            let (calibrated, report) = self.stage(PipelineStage::Calibration, || {
                self.calibrate(&unwrapped, saturated, center, planes)
            })?;
            if report.mode == CalibrationMode::PassThrough {
                let reason = if saturated {
                    "noise mask covers every pixel"
                } else if center.is_none() {
                    "no ring center"
                } else {
                    "ring center outside the image"
                };
                out.diagnostics.push(Diagnostic::CalibrationPassThrough {
                    reason: reason.into(),
                });
            }
            out.calibrated = Some(Arc::new(calibrated));
            out.calibration = Some(report);

            if let Some(ticket) = parabola_ticket {
                let fit = ticket.wait();
                self.reporter.finish_stage(PipelineStage::ParabolicFit);
                match fit {
                    Ok(Some(fit)) => out.parabola = Some(Arc::new(fit)),
                    Ok(None) => out.diagnostics.push(Diagnostic::ParabolicFitSkipped {
                        reason: "too few valid pixels".into(),
                    }),
                    Err(e) => out.diagnostics.push(Diagnostic::ParabolicFitSkipped {
                        reason: e.to_string(),
                    }),
                }
            }
            Ok(())
        })
    }

    /// S2-S5, storing each product as it lands. Returns the wrapped map and noise mask.
    fn phase_and_noise(
        &self,
        trimmed: &Arc<Cube>,
        out: &mut PipelineOutput,
    ) -> Result<(Arc<PlaneMap>, Arc<NoiseMask>)> {
        let cfg = &self.config;
        let cache = self.cache.as_deref();

        let detector = cfg.algorithms.continuum;
        let ratio = cfg.continuum_to_fsr_ratio;
        let key = StageKey::new("continuum", &[trimmed.hash()], |k| {
            k.tag(detector.name()).f64(ratio);
        });
        let continuum = self.stage(PipelineStage::Continuum, || {
            memo(cache, key, || continuum_map(trimmed, detector, ratio))
        })?;
        out.continuum = Some(Arc::clone(&continuum));

        let key = StageKey::new("discontinuum", &[trimmed.hash(), continuum.hash()], |_| {});
        let discontinuum = self.stage(PipelineStage::Discontinuum, || {
            memo(cache, key, || discontinuum(trimmed, &continuum))
        })?;
        out.discontinuum = Some(Arc::clone(&discontinuum));

        let algorithm = cfg.algorithms.barycenter;
        let key = StageKey::new("barycenter", &[discontinuum.hash()], |k| {
            k.tag(algorithm.name());
        });
        let wrapped = self.stage(PipelineStage::Barycenter, || {
            memo(cache, key, || Ok(wrapped_phase_map(&discontinuum, algorithm)))
        })?;
        out.wrapped = Some(Arc::clone(&wrapped));

        let detector = cfg.algorithms.noise;
        let key = StageKey::new("noise", &[trimmed.hash(), wrapped.hash()], |k| {
            k.tag(detector.name())
                .opt_f64(cfg.noise_threshold)
                .usize(cfg.noise_mask_radius);
        });
        let noise = self.stage(PipelineStage::Noise, || {
            memo(cache, key, || {
                noise_mask(trimmed, &wrapped, detector, cfg.noise_threshold, cfg.noise_mask_radius)
            })
        })?;

        out.noise = Some(Arc::clone(&noise));
        Ok((wrapped, noise))
    }

    /// S6.
    fn rings(&self, trimmed: &Arc<Cube>) -> Result<Arc<RingGeometry>> {
        let cfg = &self.config;
        let finder = cfg.algorithms.ring_finder;
        let percentile = cfg.ring_percentile();
        let key = StageKey::new("rings", &[trimmed.hash()], |k| {
            k.tag(finder.name()).usize(cfg.ring_plane).u64(percentile as u64);
        });
        memo(self.cache.as_deref(), key, || {
            find_rings(trimmed, finder, cfg.ring_plane, percentile)
        })
    }

    /// Queue S7. The job owns its inputs.
    fn submit_airy(
        &self,
        trimmed: &Arc<Cube>,
        rings: &Arc<RingGeometry>,
    ) -> Result<FitTicket<Result<Arc<AiryFitResult>>>> {
        let cfg = &self.config;
        let settings = AirySettings::new(cfg.calibration_wavelength, cfg.calibration_order(), cfg.finesse)
            .with_max_iterations(cfg.max_fit_iterations);
        let algorithm = cfg.algorithms.airy;
        let key = StageKey::new("airy", &[trimmed.hash(), rings.hash()], |k| {
            k.tag(algorithm.name())
                .f64(settings.wavelength_um)
                .u64(settings.order as u64)
                .f64(settings.finesse)
                .usize(settings.max_iterations);
        });

        let cube = Arc::clone(trimmed);
        let rings = Arc::clone(rings);
        let cache = self.cache.clone();
        self.reporter.begin_stage(PipelineStage::AiryFit, None);
        self.fitter.submit(PipelineStage::AiryFit.slug(), move || {
            memo(cache.as_deref(), key, || fit_airy(&cube, &rings, algorithm, &settings))
        })
    }

    /// S8.
    fn border(
        &self,
        wrapped: &PlaneMap,
        rings: &RingGeometry,
        noise: &NoiseMask,
        period: f64,
    ) -> Result<Arc<PlaneMap>> {
        let key = StageKey::new("border", &[wrapped.hash(), rings.hash(), noise.hash()], |k| {
            k.f64(period);
        });
        memo(self.cache.as_deref(), key, || {
            border_distance_map(wrapped, rings, noise, period)
        })
    }

    /// S12, passing the map through when no anchor is usable.
    fn calibrate(
        &self,
        unwrapped: &PlaneMap,
        saturated: bool,
        center: Option<RingCenter>,
        planes: usize,
    ) -> Result<(PlaneMap, CalibrationReport)> {
        match center {
            Some(center) if !saturated => {
                calibrate_wavelength(unwrapped, &self.config.calibration_inputs(planes, center))
            }
            _ => {
                warn!("Calibration degraded to identity");
                Ok((unwrapped.clone(), CalibrationReport::pass_through()))
            }
        }
    }
}
