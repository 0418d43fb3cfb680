use crate::config::VadConfig;
use crate::engine::VadEngine;
use crate::state::TurnStateMachine;
use crate::types::{TurnEvent, TurnState};

/// Energy-threshold turn detector.
///
/// Tracks an adaptive noise floor (EMA over silent frames) and flags a frame
/// as speech when its level exceeds the floor by the onset threshold. The
/// debounced state machine turns those per-frame decisions into boundary
/// events.
pub struct EnergyVad {
    config: VadConfig,
    state_machine: TurnStateMachine,
    noise_floor_db: f32,
    last_energy_db: f32,
}

impl EnergyVad {
    pub fn new(config: VadConfig) -> Self {
        let state_machine =
            TurnStateMachine::new(config.speech_debounce_ms, config.silence_debounce_ms);
        let noise_floor_db = config.initial_floor_db;
        Self {
            config,
            state_machine,
            noise_floor_db,
            last_energy_db: -100.0,
        }
    }

    fn frame_dbfs(frame: &[i16]) -> f32 {
        if frame.is_empty() {
            return -100.0;
        }
        let sum_squares: i64 = frame.iter().map(|&s| (s as i64) * (s as i64)).sum();
        let rms = ((sum_squares as f64 / frame.len() as f64).sqrt() / 32768.0) as f32;
        if rms <= 1e-10 {
            -100.0
        } else {
            20.0 * rms.log10()
        }
    }

    pub fn noise_floor_db(&self) -> f32 {
        self.noise_floor_db
    }
}

impl VadEngine for EnergyVad {
    fn process(&mut self, frame: &[i16]) -> Option<TurnEvent> {
        let energy_db = Self::frame_dbfs(frame);
        self.last_energy_db = energy_db;

        let is_speech = match self.state_machine.current_state() {
            TurnState::Silence => energy_db > self.noise_floor_db + self.config.onset_threshold_db,
            TurnState::Speaking => energy_db > self.noise_floor_db + self.config.offset_threshold_db,
        };

        // Only silent frames feed the floor, so sustained speech cannot
        // drag it upward.
        if !is_speech && energy_db > -100.0 {
            let a = self.config.floor_ema_alpha;
            self.noise_floor_db = (1.0 - a) * self.noise_floor_db + a * energy_db;
        }

        let frame_ms = frame.len() as f32 * 1000.0 / self.config.sample_rate_hz as f32;
        self.state_machine.process(is_speech, frame_ms, energy_db)
    }

    fn finish(&mut self) -> Option<TurnEvent> {
        self.state_machine.force_stop()
    }

    fn reset(&mut self) {
        self.state_machine.reset();
        self.noise_floor_db = self.config.initial_floor_db;
        self.last_energy_db = -100.0;
    }

    fn current_state(&self) -> TurnState {
        self.state_machine.current_state()
    }
}
