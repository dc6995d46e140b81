// 该文件是 Chewei （车位） 项目的一部分。
// src/sampler.rs - 处理帧率限制
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleDecision {
  Process,
  Skip,
}

/// 按墙钟时间决定是否处理当前帧，与输入帧率无关
///
/// 两次被接受的帧之间的帧直接丢弃，不做缓冲。
#[derive(Debug, Clone)]
pub struct FrameSampler {
  interval: Duration,
  last_accepted: Instant,
}

impl FrameSampler {
  /// `started_at` 作为初始的“上次接受时刻”
  pub fn new(target_fps: u32, started_at: Instant) -> Self {
    let interval = Duration::from_secs_f64(1.0 / target_fps.max(1) as f64);
    Self {
      interval,
      last_accepted: started_at,
    }
  }

  pub fn interval(&self) -> Duration {
    self.interval
  }

  pub fn last_accepted(&self) -> Instant {
    self.last_accepted
  }

  pub fn decide(&mut self, now: Instant) -> SampleDecision {
    if now.saturating_duration_since(self.last_accepted) >= self.interval {
      self.last_accepted = now;
      SampleDecision::Process
    } else {
      SampleDecision::Skip
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn accepted_times(target_fps: u32, source_fps: u32, seconds: u32) -> Vec<Duration> {
    let start = Instant::now();
    let mut sampler = FrameSampler::new(target_fps, start);
    let frame_gap = Duration::from_secs(1) / source_fps;
    (1..=source_fps * seconds)
      .map(|i| frame_gap * i)
      .filter(|offset| sampler.decide(start + *offset) == SampleDecision::Process)
      .collect()
  }

  #[test]
  fn one_fps_from_thirty_fps_source() {
    let accepted = accepted_times(1, 30, 5);
    assert!(
      (4..=6).contains(&accepted.len()),
      "accepted {} samples",
      accepted.len()
    );
  }

  #[test]
  fn accepted_samples_are_spaced_by_interval() {
    for (target, source) in [(1, 30), (2, 25), (5, 60), (3, 3)] {
      let accepted = accepted_times(target, source, 4);
      let interval = Duration::from_secs(1) / target;
      let epsilon = Duration::from_micros(1);
      for pair in accepted.windows(2) {
        assert!(pair[1] - pair[0] + epsilon >= interval);
      }
    }
  }

  #[test]
  fn slow_source_accepts_every_frame() {
    let accepted = accepted_times(5, 2, 3);
    assert_eq!(accepted.len(), 6);
  }

  #[test]
  fn first_frame_waits_for_one_interval() {
    let start = Instant::now();
    let mut sampler = FrameSampler::new(1, start);

    assert_eq!(sampler.decide(start), SampleDecision::Skip);
    assert_eq!(
      sampler.decide(start + Duration::from_millis(999)),
      SampleDecision::Skip
    );
    assert_eq!(
      sampler.decide(start + Duration::from_secs(1)),
      SampleDecision::Process
    );
    assert_eq!(sampler.last_accepted(), start + Duration::from_secs(1));
    assert_eq!(
      sampler.decide(start + Duration::from_millis(1500)),
      SampleDecision::Skip
    );
  }
}
