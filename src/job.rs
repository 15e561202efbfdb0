//! JSON job files: the model, the phone inventory and the utterances to align.

use std::collections::HashMap;
use std::path::Path;

use bw_core::{
    AcousticModel, BwError, DensityConfig, FeatureSeq, ForwardConfig, GaussianMixtureSet,
    MixtureWeights, PhoneModel, PhoneSegment, SentenceHmm, SentenceHmmBuilder,
};
use ndarray::{Array2, Array3};
use serde::{Deserialize, Serialize};

use crate::error::BatchError;

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct JobFile {
    pub model: ModelSpec,
    pub phones: Vec<PhoneSpec>,
    pub utterances: Vec<UtteranceSpec>,
    /// Overrides `BW_BEAM`.
    #[serde(default)]
    pub beam: Option<f64>,
    /// Overrides `BW_BACKPOINTERS`.
    #[serde(default)]
    pub backpointers: Option<bool>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ModelSpec {
    /// Per stream, `[codebook][density][dim]`.
    pub means: Vec<Vec<Vec<Vec<f32>>>>,
    /// Diagonal variances, same layout as `means`.
    pub variances: Vec<Vec<Vec<Vec<f32>>>>,
    /// `[mixw][stream][density]`.
    pub mixture_weights: Vec<Vec<Vec<f32>>>,
    #[serde(default)]
    pub n_top: Option<usize>,
    #[serde(default)]
    pub var_floor: Option<f32>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct PhoneSpec {
    pub name: String,
    /// `(n_emit, n_emit + 1)` transition matrix, last column is the exit.
    pub tmat: Vec<Vec<f32>>,
    pub senones: Vec<u32>,
    pub codebooks: Vec<u32>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct UtteranceSpec {
    pub id: String,
    /// Phone names of the transcript, in order.
    pub phones: Vec<String>,
    /// Per stream, `[frame][dim]`.
    pub features: Vec<Vec<Vec<f32>>>,
    #[serde(default)]
    pub segments: Option<Vec<SegmentSpec>>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SegmentSpec {
    pub phone: String,
    pub start: usize,
    pub end: usize,
}

impl JobFile {
    pub fn load(path: &Path) -> Result<Self, BatchError> {
        let data = std::fs::read_to_string(path)?;
        let job: Self = serde_json::from_str(&data)?;
        log::info!(
            "Loaded job {}: {} phones, {} utterances",
            path.display(),
            job.phones.len(),
            job.utterances.len()
        );
        Ok(job)
    }

    /// Environment settings with the job's own overrides applied.
    pub fn forward_config(&self) -> ForwardConfig {
        let mut config = ForwardConfig::from_env();
        if let Some(beam) = self.beam {
            config.beam = beam;
        }
        if let Some(bp) = self.backpointers {
            config.backpointers = bp;
        }
        config
    }

    pub fn density_config(&self) -> DensityConfig {
        let mut config = DensityConfig::from_env();
        if let Some(n_top) = self.model.n_top {
            config.n_top = n_top;
        }
        if let Some(floor) = self.model.var_floor {
            config.var_floor = floor;
        }
        config
    }
}

impl ModelSpec {
    /// Builds the model and runs its one-time variance precomputation.
    pub fn build(&self, density: &DensityConfig) -> Result<AcousticModel, BatchError> {
        let mean = self
            .means
            .iter()
            .enumerate()
            .map(|(f, m)| array3(&format!("means of stream {f}"), m))
            .collect::<Result<Vec<_>, _>>()?;
        let var = self
            .variances
            .iter()
            .enumerate()
            .map(|(f, v)| array3(&format!("variances of stream {f}"), v))
            .collect::<Result<Vec<_>, _>>()?;
        let mixw = array3("mixture weights", &self.mixture_weights)?;

        // The engine cannot rank more densities than a codebook has.
        let n_density = mean.first().map_or(0, |m| m.dim().1);
        let n_top = density.n_top.min(n_density).max(1);
        if n_top != density.n_top {
            log::warn!(
                "n_top {} does not fit n_density {n_density}, using n_top {n_top}",
                density.n_top
            );
        }

        let gauden = GaussianMixtureSet::from_params(mean, var, n_top).map_err(BwError::from)?;
        let mut model =
            AcousticModel::new(gauden, MixtureWeights::new(mixw)).map_err(BwError::from)?;
        model.prepare(density.var_floor).map_err(BwError::from)?;
        Ok(model)
    }
}

/// Phone inventory with transition matrices ready for HMM construction.
#[derive(Debug)]
pub struct PhoneTable {
    phones: Vec<(PhoneSpec, Array2<f32>)>,
    ids: HashMap<String, u32>,
}

impl PhoneTable {
    pub fn new(specs: &[PhoneSpec]) -> Result<Self, BatchError> {
        let mut phones = Vec::with_capacity(specs.len());
        let mut ids = HashMap::with_capacity(specs.len());
        for (i, spec) in specs.iter().enumerate() {
            let tmat = array2(&format!("transition matrix of {}", spec.name), &spec.tmat)?;
            if ids.insert(spec.name.clone(), i as u32).is_some() {
                return Err(BatchError::Job(format!("phone {} defined twice", spec.name)));
            }
            phones.push((spec.clone(), tmat));
        }
        Ok(Self { phones, ids })
    }

    pub fn id(&self, name: &str) -> Result<u32, BatchError> {
        self.ids
            .get(name)
            .copied()
            .ok_or_else(|| BatchError::Job(format!("unknown phone {name}")))
    }

    /// Concatenates the phone HMMs of a transcript.
    pub fn sentence_hmm(&self, transcript: &[String]) -> Result<SentenceHmm, BatchError> {
        let mut builder = SentenceHmmBuilder::new();
        for name in transcript {
            let id = self.id(name)?;
            let (spec, tmat) = &self.phones[id as usize];
            builder
                .append_phone(&PhoneModel {
                    phone: id,
                    tmat_id: id,
                    tmat: tmat.view(),
                    senones: &spec.senones,
                    codebooks: &spec.codebooks,
                })
                .map_err(BwError::from)?;
        }
        Ok(builder.build().map_err(BwError::from)?)
    }
}

impl UtteranceSpec {
    pub fn features(&self) -> Result<FeatureSeq, BatchError> {
        let streams = self
            .features
            .iter()
            .enumerate()
            .map(|(f, s)| array2(&format!("features of stream {f}"), s))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(FeatureSeq::new(streams).map_err(BwError::from)?)
    }

    pub fn n_frames(&self) -> usize {
        self.features.first().map_or(0, Vec::len)
    }

    pub fn segments(&self, phones: &PhoneTable) -> Result<Option<Vec<PhoneSegment>>, BatchError> {
        let Some(segments) = &self.segments else {
            return Ok(None);
        };
        let mut out = Vec::with_capacity(segments.len());
        let mut prev_end = None;
        for seg in segments {
            if seg.end < seg.start || prev_end.is_some_and(|e| seg.start <= e) {
                return Err(BatchError::Job(format!(
                    "segment {}..={} of {} is out of order",
                    seg.start, seg.end, self.id
                )));
            }
            prev_end = Some(seg.end);
            out.push(PhoneSegment {
                phone: phones.id(&seg.phone)?,
                start: seg.start,
                end: seg.end,
            });
        }
        Ok(Some(out))
    }
}

fn array2(what: &str, rows: &[Vec<f32>]) -> Result<Array2<f32>, BatchError> {
    let n_cols = rows.first().map_or(0, Vec::len);
    if rows.iter().any(|r| r.len() != n_cols) {
        return Err(BatchError::Job(format!("{what} has ragged rows")));
    }
    let flat: Vec<f32> = rows.iter().flatten().copied().collect();
    Ok(Array2::from_shape_vec((rows.len(), n_cols), flat)?)
}

fn array3(what: &str, planes: &[Vec<Vec<f32>>]) -> Result<Array3<f32>, BatchError> {
    let n_rows = planes.first().map_or(0, Vec::len);
    let n_cols = planes
        .first()
        .and_then(|p| p.first())
        .map_or(0, Vec::len);
    let ragged = planes
        .iter()
        .any(|p| p.len() != n_rows || p.iter().any(|r| r.len() != n_cols));
    if ragged {
        return Err(BatchError::Job(format!("{what} is ragged")));
    }
    let flat: Vec<f32> = planes.iter().flatten().flatten().copied().collect();
    Ok(Array3::from_shape_vec((planes.len(), n_rows, n_cols), flat)?)
}
