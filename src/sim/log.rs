//! Episode logs
//!
//! Each active agent accumulates its own `Log` during an episode. At the
//! episode boundary the per-agent logs are folded into one running `Log`.

use serde::{Deserialize, Serialize};

/// Episode statistics; rates are 0/1 per agent until aggregated
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Log {
    pub episode_return: f32,
    pub episode_length: f32,
    pub perf: f32,
    pub score: f32,
    pub offroad_rate: f32,
    pub collision_rate: f32,
    /// Collisions before any respawn this episode
    pub clean_collision_rate: f32,
    pub completion_rate: f32,
    /// Neither crashed, left the road, nor reached the goal
    pub dnf_rate: f32,
    /// Number of agent-episodes folded in
    pub n: f32,
    pub lane_alignment_rate: f32,
    pub avg_displacement_error: f32,
}

/// End-of-episode flags that are not part of the per-agent log
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EpisodeOutcome {
    pub reached_goal: bool,
    pub collided_before_goal: bool,
}

impl Log {
    /// Fold one agent's episode into the running log
    pub fn add_agent(&mut self, agent: &Log, outcome: EpisodeOutcome) {
        let offroad = agent.offroad_rate >= 1.0;
        let collided = agent.collision_rate >= 1.0;

        if outcome.reached_goal {
            self.completion_rate += 1.0;
        }
        if outcome.reached_goal && !outcome.collided_before_goal {
            self.score += 1.0;
            self.perf += 1.0;
        }
        if !offroad && !collided && !outcome.reached_goal {
            self.dnf_rate += 1.0;
        }

        self.offroad_rate += offroad as u8 as f32;
        self.collision_rate += collided as u8 as f32;
        self.clean_collision_rate += (agent.clean_collision_rate >= 1.0) as u8 as f32;
        self.lane_alignment_rate += (agent.lane_alignment_rate >= 1.0) as u8 as f32;
        self.avg_displacement_error += agent.avg_displacement_error;
        self.episode_length += agent.episode_length;
        self.episode_return += agent.episode_return;
        self.n += 1.0;
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.n == 0.0
    }

    /// Per-agent means of every field (`n` kept as the count)
    pub fn averaged(&self) -> Log {
        if self.is_empty() {
            return *self;
        }
        let n = self.n;
        Log {
            episode_return: self.episode_return / n,
            episode_length: self.episode_length / n,
            perf: self.perf / n,
            score: self.score / n,
            offroad_rate: self.offroad_rate / n,
            collision_rate: self.collision_rate / n,
            clean_collision_rate: self.clean_collision_rate / n,
            completion_rate: self.completion_rate / n,
            dnf_rate: self.dnf_rate / n,
            n,
            lane_alignment_rate: self.lane_alignment_rate / n,
            avg_displacement_error: self.avg_displacement_error / n,
        }
    }
}
