// crates/spineprep-graph/src/plan.rs

//! Build the processing DAG from a manifest and configuration.
//!
//! One step per (run, stage) in the fixed stage order `segment ->
//! crop_detect -> mppca -> motion -> confounds`, plus subject-level
//! anatomical stages (`segment_anat`, `register_template`) and per-run
//! `mask_warp` when registration is enabled.
//!
//! Rules bind to run identifiers as wildcards: planning records only the
//! run key and the primary-output template; per-run input closures
//! (crop sidecars, parameter tables, masks) are resolved by the steps at
//! execution time. That is what lets a crop sidecar written mid-execution
//! be consumed without a graph rebuild.

use serde::{Deserialize, Serialize};
use spineprep_core::{
    deriv::{anat_path, func_path, xfm_path, Desc, Space},
    Config, Manifest, MaskSource, RunId,
};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

/// Pipeline stages in execution order.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Cord segmentation from the functional series (per run).
    Segment,
    /// Temporal-crop detection (per run).
    CropDetect,
    /// MP-PCA denoise (per run).
    Mppca,
    /// Motion correction (per run).
    Motion,
    /// Confounds extraction (per run).
    Confounds,
    /// Cord segmentation of the anatomical image (per subject).
    SegmentAnat,
    /// Vertebral labeling of the anatomical image (per subject).
    LabelVertebrae,
    /// Template registration (per subject).
    Registration,
    /// Cord-mask warp to template space (per run).
    MaskWarp,
}

impl Stage {
    /// Stable stage name for summaries and DOT labels.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Segment => "segment",
            Self::CropDetect => "crop_detect",
            Self::Mppca => "mppca",
            Self::Motion => "motion",
            Self::Confounds => "confounds",
            Self::SegmentAnat => "segment_anat",
            Self::LabelVertebrae => "label_vertebrae",
            Self::Registration => "registration",
            Self::MaskWarp => "mask_warp",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Index of a step within its DAG.
pub type StepId = usize;

/// What a step binds to: a run wildcard or a subject.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum StepScope {
    /// Per-run step, keyed by the run's entity tuple.
    Run(RunId),
    /// Per-subject step: (subject, session).
    Subject(String, Option<String>),
}

/// One node of the processing DAG.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct StepSpec {
    /// Node index.
    pub id: StepId,
    /// Stage this step belongs to.
    pub stage: Stage,
    /// Run or subject binding.
    pub scope: StepScope,
    /// Primary output (the idempotence anchor).
    pub primary_output: PathBuf,
    /// Prerequisite step ids.
    pub deps: Vec<StepId>,
}

impl StepSpec {
    /// Human-readable node label (`stage:key`).
    #[must_use]
    pub fn label(&self) -> String {
        match &self.scope {
            StepScope::Run(id) => format!("{}:{}", self.stage, id.key()),
            StepScope::Subject(subject, session) => {
                let ses = session
                    .as_deref()
                    .map(|s| format!("_ses-{s}"))
                    .unwrap_or_default();
                format!("{}:sub-{subject}{ses}", self.stage)
            }
        }
    }
}

/// The planned processing graph.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct Dag {
    /// Steps in insertion (already topological) order.
    pub steps: Vec<StepSpec>,
}

impl Dag {
    /// Number of steps.
    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Whether the DAG is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Group step ids into topological waves: a step's wave is one past
    /// the maximum wave of its dependencies.
    #[must_use]
    pub fn waves(&self) -> Vec<Vec<StepId>> {
        let mut level = vec![0usize; self.steps.len()];
        let mut max_level = 0;
        for step in &self.steps {
            let l = step
                .deps
                .iter()
                .map(|&d| level[d] + 1)
                .max()
                .unwrap_or(0);
            level[step.id] = l;
            max_level = max_level.max(l);
        }
        let mut waves = vec![Vec::new(); max_level + 1];
        for step in &self.steps {
            waves[level[step.id]].push(step.id);
        }
        waves
    }
}

/// Plan the DAG for one invocation.
#[must_use]
pub fn plan(manifest: &Manifest, config: &Config) -> Dag {
    let root = &config.paths.deriv_dir;
    let mut dag = Dag::default();
    let mut push = |stage: Stage, scope: StepScope, output: PathBuf, deps: Vec<StepId>| {
        let id = dag.steps.len();
        dag.steps.push(StepSpec {
            id,
            stage,
            scope,
            primary_output: output,
            deps,
        });
        id
    };

    // Subject-level anatomical chain (registration enabled only).
    let mut subject_reg: HashMap<(String, Option<String>), StepId> = HashMap::new();
    if config.registration.enable {
        for anat in &manifest.anat {
            let scope_key = (anat.subject.clone(), anat.session.clone());
            let seg_out = anat_path(
                root,
                &anat.subject,
                anat.session.as_deref(),
                Space::Native,
                Desc::Cordmask,
            );
            let seg_id = push(
                Stage::SegmentAnat,
                StepScope::Subject(anat.subject.clone(), anat.session.clone()),
                seg_out,
                vec![],
            );
            let labels_out = anat_path(
                root,
                &anat.subject,
                anat.session.as_deref(),
                Space::Native,
                Desc::Labels,
            );
            let labels_id = push(
                Stage::LabelVertebrae,
                StepScope::Subject(anat.subject.clone(), anat.session.clone()),
                labels_out,
                vec![seg_id],
            );
            let reg_out = xfm_path(root, &anat.subject, anat.session.as_deref(), Space::Pam50);
            let reg_id = push(
                Stage::Registration,
                StepScope::Subject(anat.subject.clone(), anat.session.clone()),
                reg_out,
                vec![labels_id],
            );
            subject_reg.insert(scope_key, reg_id);
        }
    }

    // Per-run chain.
    for run in &manifest.runs {
        let id = &run.id;
        let scope = StepScope::Run(id.clone());

        let mut prev: Option<StepId> = None;
        let mut seg_id: Option<StepId> = None;

        if config.options.masks.enable && config.options.masks.source != MaskSource::None {
            let out = func_path(root, id, Space::Native, Desc::Cordmask);
            let s = push(Stage::Segment, scope.clone(), out, vec![]);
            seg_id = Some(s);
            prev = Some(s);
        }

        if config.options.temporal_crop.enable {
            let out = func_path(root, id, Space::Native, Desc::Crop);
            let deps = prev.into_iter().collect();
            prev = Some(push(Stage::CropDetect, scope.clone(), out, deps));
        }

        let out = func_path(root, id, Space::Native, Desc::Mppca);
        let deps = prev.into_iter().collect();
        prev = Some(push(Stage::Mppca, scope.clone(), out, deps));

        let out = func_path(root, id, Space::Native, Desc::Motion);
        let deps = prev.into_iter().collect();
        let motion_id = push(Stage::Motion, scope.clone(), out, deps);

        let out = func_path(root, id, Space::Native, Desc::Confounds);
        push(Stage::Confounds, scope.clone(), out, vec![motion_id]);

        if config.registration.enable {
            let reg = subject_reg.get(&(id.subject.clone(), id.session.clone()));
            if let (Some(&reg_id), Some(seg)) = (reg, seg_id) {
                let out = func_path(root, id, Space::Pam50, Desc::Cordmask);
                push(Stage::MaskWarp, scope.clone(), out, vec![reg_id, seg]);
            }
        }
    }

    dag
}
