//! Pipeline orchestrator — runs the five phases in order, emits progress,
//! and honors cooperative cancellation between every step and LLM call.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;

use crate::assign::{self, ActAssignments};
use crate::error::EngineError;
use crate::events::{PipelinePhase, ProgressBus, ProgressEvent};
use crate::library::TrackTable;
use crate::llm::Llm;
use crate::narrative::{self, Act, NarrativeArc};
use crate::phases::{BuiltinProfiles, PhaseProfiles};
use crate::pool::{self, PoolProfile};
use crate::sequence::{self, OrderedTrack};
use crate::slots::{BpmLadderFill, SetSlot, SlotFill, SlotSource};
use crate::store::{SavedSet, SetStore};
use crate::trees::{Tree, TreeKind};
use crate::MIN_POOL_SIZE;

/// Inputs for one pipeline run.
pub struct BuildRequest {
    pub track_ids: Vec<i64>,
    pub phase_profile_id: String,
    pub set_name: String,
    pub trees: BTreeMap<TreeKind, Tree>,
}

/// Complete output of a finished pipeline run.
#[derive(Debug)]
pub struct AutoSetResult {
    pub narrative: String,
    pub acts: Vec<Act>,
    pub ordered_tracks: Vec<OrderedTrack>,
    pub pool_profile: PoolProfile,
    pub set: SavedSet,
}

/// How a run ended: a built set, or a cooperative stop.
#[derive(Debug)]
pub enum BuildOutcome {
    Completed(Box<AutoSetResult>),
    Stopped,
}

/// The narrative set construction engine. One pipeline may run at a time;
/// capability implementations are injected at construction.
pub struct Engine {
    llm: Arc<dyn Llm>,
    store: Arc<dyn SetStore>,
    profiles: Arc<dyn PhaseProfiles>,
    slot_fill: Arc<dyn SlotFill>,
    bus: ProgressBus,
    in_flight: AtomicBool,
    last_result: Mutex<Option<Arc<AutoSetResult>>>,
}

impl Engine {
    pub fn new(llm: Arc<dyn Llm>, store: Arc<dyn SetStore>) -> Self {
        Self {
            llm,
            store,
            profiles: Arc::new(BuiltinProfiles),
            slot_fill: Arc::new(BpmLadderFill),
            bus: ProgressBus::new(),
            in_flight: AtomicBool::new(false),
            last_result: Mutex::new(None),
        }
    }

    pub fn with_profiles(mut self, profiles: Arc<dyn PhaseProfiles>) -> Self {
        self.profiles = profiles;
        self
    }

    pub fn with_slot_fill(mut self, slot_fill: Arc<dyn SlotFill>) -> Self {
        self.slot_fill = slot_fill;
        self
    }

    /// The progress bus; subscribe before starting a build to see all events.
    pub fn progress(&self) -> &ProgressBus {
        &self.bus
    }

    pub fn is_building(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Most recent completed result, if any.
    pub fn last_result(&self) -> Option<Arc<AutoSetResult>> {
        self.last_result.lock().unwrap().clone()
    }

    /// Start a build on a background task. Rejects a second concurrent
    /// start. Returns the cancel token for the new run.
    pub fn spawn_build(
        self: &Arc<Self>,
        table: Arc<TrackTable>,
        request: BuildRequest,
    ) -> Result<CancellationToken, EngineError> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(EngineError::BuildInProgress);
        }

        let cancel = CancellationToken::new();
        let engine = Arc::clone(self);
        let token = cancel.clone();
        tokio::spawn(async move {
            // The token is polled cooperatively inside the pipeline, but a
            // cancel during a slow LLM call should also land: racing the
            // pipeline against the token interrupts any await point.
            let outcome = tokio::select! {
                res = engine.run_pipeline(&table, &request, &token) => res,
                _ = token.cancelled() => Ok(engine.stopped()),
            };
            match outcome {
                Ok(BuildOutcome::Completed(result)) => {
                    *engine.last_result.lock().unwrap() = Some(Arc::new(*result));
                }
                Ok(BuildOutcome::Stopped) => {}
                Err(e) => {
                    log::error!("Set build failed: {e}");
                    engine.bus.emit(ProgressEvent::Error {
                        detail: e.to_string(),
                    });
                }
            }
            engine.in_flight.store(false, Ordering::SeqCst);
        });
        Ok(cancel)
    }

    /// Run the full pipeline inline. Checks the cancel token after every
    /// phase and before every LLM call; a cancelled run never touches the
    /// set store.
    pub async fn build(
        &self,
        table: &TrackTable,
        request: &BuildRequest,
        cancel: &CancellationToken,
    ) -> Result<BuildOutcome, EngineError> {
        self.run_pipeline(table, request, cancel).await
    }

    async fn run_pipeline(
        &self,
        table: &TrackTable,
        request: &BuildRequest,
        cancel: &CancellationToken,
    ) -> Result<BuildOutcome, EngineError> {
        let valid_ids = table.filter_known(&request.track_ids);
        if valid_ids.len() < MIN_POOL_SIZE {
            return Err(EngineError::InsufficientPool {
                got: valid_ids.len(),
                min: MIN_POOL_SIZE,
            });
        }

        // Phase 1: pool analysis
        self.bus.progress(
            PipelinePhase::PoolAnalysis,
            format!("Analyzing {} tracks...", valid_ids.len()),
            2,
        );
        let pool_profile = pool::analyze_pool(table, &valid_ids, &request.trees)?;
        self.bus.progress(
            PipelinePhase::PoolAnalysis,
            format!(
                "Pool: {} tracks, BPM {}-{}, {} genres, {} moods",
                pool_profile.track_count,
                pool_profile.bpm.as_ref().map(|b| b.min).unwrap_or(0.0),
                pool_profile.bpm.as_ref().map(|b| b.max).unwrap_or(0.0),
                pool_profile.genres.len(),
                pool_profile.moods.len(),
            ),
            8,
        );
        if cancel.is_cancelled() {
            return Ok(self.stopped());
        }

        // Phase 2: narrative arc
        self.bus.progress(
            PipelinePhase::NarrativeArc,
            "Generating narrative arc...",
            10,
        );
        let phase_profile = self
            .profiles
            .get(&request.phase_profile_id)
            .ok_or_else(|| EngineError::PhaseProfileNotFound(request.phase_profile_id.clone()))?;
        let arc = narrative::generate_narrative_arc(&pool_profile, &phase_profile, &*self.llm).await?;
        self.bus.progress(
            PipelinePhase::NarrativeArc,
            format!("Narrative generated — {} acts defined", arc.acts.len()),
            28,
        );
        if cancel.is_cancelled() {
            return Ok(self.stopped());
        }

        // Phase 3: track assignment
        let assignments = self
            .assign_phase(table, &valid_ids, &arc, cancel)
            .await;
        let Some(assignments) = assignments else {
            return Ok(self.stopped());
        };

        // Phase 4: selection and ordering
        self.bus.progress(
            PipelinePhase::TrackOrdering,
            "Ordering tracks for flow...",
            55,
        );
        let Some(mut ordered_tracks) =
            sequence::select_and_order(table, &assignments, &arc.acts, cancel)
        else {
            return Ok(self.stopped());
        };
        self.bus.progress(
            PipelinePhase::TrackOrdering,
            format!(
                "Selected {} tracks, reviewing sequence...",
                ordered_tracks.len()
            ),
            65,
        );
        if cancel.is_cancelled() {
            return Ok(self.stopped());
        }
        sequence::review_sequence(&mut ordered_tracks, &arc.acts, &*self.llm).await;
        self.bus.progress(
            PipelinePhase::TrackOrdering,
            format!("Final tracklist: {} tracks", ordered_tracks.len()),
            78,
        );
        if cancel.is_cancelled() {
            return Ok(self.stopped());
        }

        // Phase 5: assembly
        self.bus.progress(
            PipelinePhase::Assembly,
            "Assembling workshop set...",
            80,
        );
        let Some(slots) = self.assemble_slots(table, &ordered_tracks, &assignments, cancel) else {
            return Ok(self.stopped());
        };

        let set = self.store.create_saved_set(
            &request.set_name,
            slots,
            Some(&request.phase_profile_id),
        )?;
        self.bus.progress(
            PipelinePhase::Assembly,
            format!("Set '{}' saved with {} slots", set.name, set.slots.len()),
            98,
        );

        self.bus.emit(ProgressEvent::Done {
            set_id: set.id.clone(),
            percent: 100,
        });

        Ok(BuildOutcome::Completed(Box::new(AutoSetResult {
            narrative: arc.narrative,
            acts: arc.acts,
            ordered_tracks,
            pool_profile,
            set,
        })))
    }

    /// Phase 3 body: score, assign greedily, rebalance, review borderlines.
    /// Returns None if cancelled.
    async fn assign_phase(
        &self,
        table: &TrackTable,
        valid_ids: &[i64],
        arc: &NarrativeArc,
        cancel: &CancellationToken,
    ) -> Option<ActAssignments> {
        self.bus.progress(
            PipelinePhase::TrackAssignment,
            "Assigning tracks to acts...",
            30,
        );
        self.bus.progress(
            PipelinePhase::TrackAssignment,
            format!(
                "Scoring {} tracks against {} acts...",
                valid_ids.len(),
                arc.acts.len()
            ),
            32,
        );
        let matrix = assign::score_pool(table, valid_ids, &arc.acts);
        let mut assignments = assign::greedy_assign(&matrix, arc.acts.len());
        self.bus.progress(
            PipelinePhase::TrackAssignment,
            format!("Initial assignment: {}", act_counts(&assignments, &arc.acts)),
            38,
        );
        if cancel.is_cancelled() {
            return None;
        }

        assign::rebalance(&mut assignments, &arc.acts, &matrix, cancel);
        if cancel.is_cancelled() {
            return None;
        }

        self.bus.progress(
            PipelinePhase::TrackAssignment,
            "Reviewing borderline assignments...",
            42,
        );
        let borderline = assign::find_borderline(&matrix, &assignments);
        if !borderline.is_empty() {
            assign::review_borderlines(
                table,
                &borderline,
                &arc.acts,
                &mut assignments,
                &matrix,
                &*self.llm,
            )
            .await;
        }
        self.bus.progress(
            PipelinePhase::TrackAssignment,
            format!("Final assignment: {}", act_counts(&assignments, &arc.acts)),
            52,
        );
        if cancel.is_cancelled() {
            return None;
        }
        Some(assignments)
    }

    /// Phase 5 body: one slot per ordered track, with BPM alternatives
    /// drawn from the track's act pool. Returns None if cancelled.
    fn assemble_slots(
        &self,
        table: &TrackTable,
        ordered_tracks: &[OrderedTrack],
        assignments: &ActAssignments,
        cancel: &CancellationToken,
    ) -> Option<Vec<SetSlot>> {
        self.bus.progress(
            PipelinePhase::Assembly,
            "Building workshop slots...",
            82,
        );
        let mut slots = Vec::with_capacity(ordered_tracks.len());
        let mut used_ids: HashSet<i64> = HashSet::new();

        for (i, track) in ordered_tracks.iter().enumerate() {
            if cancel.is_cancelled() {
                return None;
            }
            used_ids.insert(track.track_id);

            let act_track_ids: Vec<i64> = assignments
                .get(track.act_idx)
                .map(|tracks| tracks.iter().map(|(tid, _)| *tid).collect())
                .unwrap_or_default();

            let mut others = used_ids.clone();
            others.remove(&track.track_id);
            let options =
                self.slot_fill
                    .fill(table, &act_track_ids, &others, Some(track.track_id));

            let selected_idx = options
                .iter()
                .position(|opt| opt.as_ref().is_some_and(|o| o.id == track.track_id))
                .unwrap_or(0);

            slots.push(SetSlot {
                id: format!("autoset-slot-{i}"),
                source: SlotSource::Autoset {
                    id: format!("act-{}", track.act_idx),
                    name: track.act_name.clone(),
                },
                tracks: options,
                selected_track_index: selected_idx,
            });

            if i % 5 == 0 {
                let pct = 82 + (16 * i / ordered_tracks.len().max(1)) as u8;
                self.bus.progress(
                    PipelinePhase::Assembly,
                    format!("Built slot {}/{}...", i + 1, ordered_tracks.len()),
                    pct,
                );
            }
        }

        Some(slots)
    }

    fn stopped(&self) -> BuildOutcome {
        log::info!("Set build stopped before completion");
        self.bus.emit(ProgressEvent::Stopped);
        BuildOutcome::Stopped
    }
}

fn act_counts(assignments: &ActAssignments, acts: &[Act]) -> String {
    let parts: Vec<String> = acts
        .iter()
        .zip(assignments)
        .map(|(act, tracks)| format!("{}: {}", act.name, tracks.len()))
        .collect();
    parts.join(", ")
}
