use anyhow::{anyhow, bail, Context, Result};
use crossbeam_channel::{unbounded, Receiver, Sender, TrySendError};
use ort::{
    Environment, Session, SessionBuilder, Value,
    GraphOptimizationLevel, LoggingLevel,
};
use ndarray::{Array2, CowArray};
use serde::Deserialize;
use std::{collections::HashMap, fs, path::Path, sync::Arc};
use std::thread;
use std::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::ClassifierConfig;
use crate::output::{FeatureSink, FeatureVector};

pub const ATTACK_THRESHOLD: f32 = 0.85;

pub struct NidsModel {
    _environment: Arc<Environment>,
    binary: Session,
    multiclass: Option<Session>,
    attack_threshold: f32,
}

#[derive(Debug, Clone)]
pub struct Inference {
    pub pred_label: u8,
    pub probs: Vec<f32>,
    pub micros: u128,
}

#[derive(Debug, Clone)]
pub struct MultiResult {
    pub bin: Inference,
    pub multi: Option<Inference>,
    /// Class name of `multi.pred_label`, when a class map was loaded.
    pub label: Option<String>,
}

impl MultiResult {
    pub fn is_attack(&self) -> bool {
        self.bin.pred_label == 1
    }

    pub fn p_attack(&self) -> f32 {
        self.bin.probs.get(1).copied().unwrap_or(0.0)
    }
}

/// Input and output ends of the classifier thread. Dropping `tx` stops it.
pub struct ClassifierHandles {
    pub tx: Sender<FeatureVector>,
    pub rx: Receiver<(FeatureVector, MultiResult)>,
}

impl FeatureSink for ClassifierHandles {
    fn name(&self) -> &str {
        "classifier"
    }

    fn deliver(&mut self, vector: &FeatureVector) -> Result<()> {
        match self.tx.try_send(vector.clone()) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => bail!("classifier queue full"),
            Err(TrySendError::Disconnected(_)) => bail!("classifier thread is gone"),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ClassMap {
    num_classes: usize,
    id_to_label: HashMap<String, String>,
}

/// Reads the training-time class map into an index → label vector. Missing
/// or out-of-range ids read as "Unknown".
pub fn load_label_vector<P: AsRef<Path>>(path: P) -> Result<Vec<String>> {
    let path = path.as_ref();
    let s = fs::read_to_string(path)
        .with_context(|| format!("Failed to read class map {}", path.display()))?;
    let m: ClassMap = serde_json::from_str(&s)
        .with_context(|| format!("Failed to parse class map {}", path.display()))?;
    let mut labels = vec!["Unknown".to_string(); m.num_classes.max(1)];
    for (k, v) in m.id_to_label {
        if let Ok(idx) = k.parse::<usize>() {
            if idx < labels.len() { labels[idx] = v; }
        }
    }
    Ok(labels)
}

fn build_session(environment: &Arc<Environment>, path: &Path) -> Result<Session> {
    SessionBuilder::new(environment)?
        .with_optimization_level(GraphOptimizationLevel::Level3)?
        .with_intra_threads(1)?
        .with_model_from_file(path)
        .with_context(|| format!("Failed to load model from {}", path.display()))
}

impl NidsModel {
    fn load(config: &ClassifierConfig) -> Result<Self> {
        let environment = Arc::new(
            Environment::builder()
                .with_name("tunnelscope-model")
                .with_log_level(LoggingLevel::Warning)
                .build()
                .context("Failed to create ONNX environment")?
        );

        let binary = build_session(&environment, &config.binary_model)?;
        let multiclass = config
            .multiclass_model
            .as_deref()
            .map(|p| build_session(&environment, p))
            .transpose()?;

        Ok(Self {
            _environment: environment,
            binary,
            multiclass,
            attack_threshold: config.attack_threshold,
        })
    }

    fn run(session: &Session, row: &[f32]) -> Result<(Vec<f32>, u128)> {
        let input = Array2::from_shape_vec((1, row.len()), row.to_vec())
            .context("Failed to create input array")?;
        let cow = CowArray::from(input.into_dyn());

        let t0 = Instant::now();
        let tensor = Value::from_array(session.allocator(), &cow)
            .context("Failed to create input tensor")?;
        let outputs = session.run(vec![tensor])
            .context("Failed to run model")?;
        let dt = t0.elapsed().as_micros();

        let probs = outputs.iter()
            .find_map(|o| o.try_extract::<f32>().ok())
            .map(|t| t.view().iter().copied().collect::<Vec<f32>>())
            .ok_or_else(|| anyhow!("No probability output from model"))?;

        Ok((probs, dt))
    }

    fn run_binary(&self, row: &[f32]) -> Result<Inference> {
        let (probs, micros) = Self::run(&self.binary, row)?;
        if probs.len() < 2 {
            bail!("Expected 2 probabilities, got {}", probs.len());
        }
        let pred_label = u8::from(probs[1] >= self.attack_threshold);
        Ok(Inference { pred_label, probs, micros })
    }

    fn run_multiclass(session: &Session, row: &[f32]) -> Result<Inference> {
        let (probs, micros) = Self::run(session, row)?;
        let pred_label = probs.iter()
            .enumerate()
            .max_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(idx, _)| idx as u8)
            .ok_or_else(|| anyhow!("Empty probability vector"))?;
        Ok(Inference { pred_label, probs, micros })
    }

    pub fn classify(&self, vector: &FeatureVector, labels: &[String]) -> Result<MultiResult> {
        let row = vector.to_f32_row();
        let bin = self.run_binary(&row)?;
        debug!(pred = bin.pred_label, micros = bin.micros as u64, "binary inference");

        let multi = match (&self.multiclass, bin.pred_label == 1) {
            (Some(session), true) => {
                let m = Self::run_multiclass(session, &row)?;
                debug!(class = m.pred_label, micros = m.micros as u64, "multiclass inference");
                Some(m)
            }
            _ => None,
        };
        let label = multi
            .as_ref()
            .map(|m| labels.get(m.pred_label as usize).cloned().unwrap_or_else(|| "Unknown".into()));

        Ok(MultiResult { bin, multi, label })
    }
}

/// Starts the classifier thread. Paths and the class map are checked up
/// front; model load failures past that point are logged by the thread.
pub fn spawn_classifier(config: &ClassifierConfig) -> Result<ClassifierHandles> {
    if !config.binary_model.is_file() {
        bail!("Binary model not found: {}", config.binary_model.display());
    }
    if let Some(p) = config.multiclass_model.as_deref().filter(|p| !p.is_file()) {
        bail!("Multiclass model not found: {}", p.display());
    }
    let labels = match &config.class_map {
        Some(p) => load_label_vector(p)?,
        None => Vec::new(),
    };

    let (tx_in, rx_in) = unbounded::<FeatureVector>();
    let (tx_out, rx_out) = unbounded::<(FeatureVector, MultiResult)>();
    let config = config.clone();

    info!(
        binary = %config.binary_model.display(),
        multiclass = ?config.multiclass_model,
        "loading classifier models"
    );

    thread::Builder::new()
        .name("tunnelscope-classifier".into())
        .spawn(move || {
            let model = match NidsModel::load(&config) {
                Ok(m) => m,
                Err(e) => {
                    error!(error = ?e, "failed to load models");
                    return;
                }
            };
            info!("classifier ready");

            while let Ok(vector) = rx_in.recv() {
                match model.classify(&vector, &labels) {
                    Ok(result) => {
                        if result.is_attack() {
                            warn!(
                                key = ?vector.key,
                                p_attack = result.p_attack(),
                                label = result.label.as_deref().unwrap_or("-"),
                                "flow classified as attack"
                            );
                        }
                        if tx_out.send((vector, result)).is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!(error = ?e, "classification failed"),
                }
            }

            debug!("classifier thread exiting");
        })?;

    Ok(ClassifierHandles { tx: tx_in, rx: rx_out })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::FeatureVector;
    use crate::processor::FeatureExtractor;
    use crate::types::PacketRecord;
    use crate::config::ExtractorConfig;
    use std::io::Write;
    use std::net::{IpAddr, Ipv4Addr};
    use std::path::PathBuf;

    fn vector() -> FeatureVector {
        let ex = FeatureExtractor::new(ExtractorConfig::default());
        let pkt = PacketRecord::new(0, 60)
            .with_ip(IpAddr::V4(Ipv4Addr::LOCALHOST), IpAddr::V4(Ipv4Addr::new(10, 1, 1, 1)), 6)
            .with_ports(1234, 80);
        ex.process(&pkt).unwrap()
    }

    #[test]
    fn label_vector_fills_gaps_with_unknown() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        write!(f, r#"{{"num_classes": 3, "id_to_label": {{"0": "DoS", "2": "PortScan", "9": "Bogus", "x": "Nope"}}}}"#).unwrap();
        let labels = load_label_vector(f.path()).unwrap();
        assert_eq!(labels, vec!["DoS", "Unknown", "PortScan"]);
    }

    #[test]
    fn label_vector_errors_name_the_file() {
        let err = load_label_vector("/nonexistent/class_map.json").unwrap_err();
        assert!(err.to_string().contains("class_map.json"));
    }

    #[test]
    fn missing_model_is_reported_before_spawning() {
        let cfg = ClassifierConfig {
            binary_model: PathBuf::from("/nonexistent/l1.onnx"),
            multiclass_model: None,
            class_map: None,
            attack_threshold: ATTACK_THRESHOLD,
        };
        assert!(spawn_classifier(&cfg).is_err());
    }

    #[test]
    fn handles_forward_vectors_as_a_sink() {
        let (tx, rx_in) = unbounded();
        let (_tx_out, rx) = unbounded();
        let mut handles = ClassifierHandles { tx, rx };
        let v = vector();
        handles.deliver(&v).unwrap();
        assert_eq!(rx_in.try_recv().unwrap().key, v.key);

        drop(rx_in);
        assert!(handles.deliver(&v).is_err());
    }

    #[test]
    fn attack_probability_reads_second_class() {
        let r = MultiResult {
            bin: Inference { pred_label: 1, probs: vec![0.1, 0.9], micros: 3 },
            multi: None,
            label: None,
        };
        assert!(r.is_attack());
        assert_eq!(r.p_attack(), 0.9);
    }
}
