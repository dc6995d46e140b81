// 该文件是 Chewei （车位） 项目的一部分。
// tests/capture_loop.rs - 处理循环集成测试
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

use std::{
  cell::{Cell, RefCell},
  collections::VecDeque,
  path::PathBuf,
  rc::Rc,
  sync::mpsc,
  time::{Duration, Instant},
};

use image::{Rgb, RgbImage};

use chewei::{
  frame::{Frame, Resolution},
  input::{InputError, InputSource},
  model::{FramePreprocessor, ModelError, OccupancyModel, Point, PreprocessSettings, Spot},
  output::{
    FanOut, ImageFileOutput, OutputError, OutputSink, OutputWrapper, SnapshotError,
    SnapshotOutput,
  },
  task::{ContinuousTask, OneShotTask, Task, TaskError, TaskExit},
};

const WIDTH: u32 = 64;
const HEIGHT: u32 = 48;

struct ScriptedInput {
  frames: VecDeque<Result<Frame, InputError>>,
  resolution: Resolution,
  releases: Rc<Cell<usize>>,
}

impl Iterator for ScriptedInput {
  type Item = Result<Frame, InputError>;

  fn next(&mut self) -> Option<Self::Item> {
    self.frames.pop_front()
  }
}

impl InputSource for ScriptedInput {
  fn resolution(&self) -> Resolution {
    self.resolution
  }

  fn release(&mut self) {
    self.releases.set(self.releases.get() + 1);
  }
}

#[derive(Clone, Copy)]
enum Failure {
  Never,
  Recoverable,
  Fatal,
}

struct RecordingSink {
  written: Rc<RefCell<Vec<u64>>>,
  closes: Rc<Cell<usize>>,
  failure: Failure,
}

impl OutputSink for RecordingSink {
  fn write_frame(&mut self, sequence: u64, _image: &RgbImage) -> Result<(), OutputError> {
    match self.failure {
      Failure::Never => {
        self.written.borrow_mut().push(sequence);
        Ok(())
      }
      Failure::Recoverable => Err(OutputError::from(SnapshotError::IoError {
        path: PathBuf::from("/full/disk"),
        source: std::io::Error::other("disk full"),
      })),
      Failure::Fatal => Err(OutputError::BackendUnavailable("test")),
    }
  }

  fn close(&mut self) -> Result<(), OutputError> {
    self.closes.set(self.closes.get() + 1);
    Ok(())
  }
}

struct Harness {
  start: Instant,
  releases: Rc<Cell<usize>>,
  closes: Rc<Cell<usize>>,
  written: Rc<RefCell<Vec<u64>>>,
}

impl Harness {
  fn new() -> Self {
    Self {
      start: Instant::now(),
      releases: Rc::new(Cell::new(0)),
      closes: Rc::new(Cell::new(0)),
      written: Rc::new(RefCell::new(Vec::new())),
    }
  }

  /// 第 i 帧（从 1 开始）在 `start + i * gap` 时刻到达
  fn frames(&self, count: u64, gap: Duration) -> VecDeque<Result<Frame, InputError>> {
    (1..=count)
      .map(|i| {
        let image = RgbImage::from_pixel(WIDTH, HEIGHT, Rgb([200, 200, 200]));
        Ok(Frame::new(image, i - 1, self.start + gap * i as u32))
      })
      .collect()
  }

  fn input(&self, frames: VecDeque<Result<Frame, InputError>>) -> ScriptedInput {
    ScriptedInput {
      frames,
      resolution: Resolution::new(WIDTH, HEIGHT),
      releases: self.releases.clone(),
    }
  }

  fn sink(&self, failure: Failure) -> RecordingSink {
    RecordingSink {
      written: self.written.clone(),
      closes: self.closes.clone(),
      failure,
    }
  }

  fn task(&self, fps: u32) -> ContinuousTask {
    ContinuousTask::new(fps).started_at(self.start)
  }

  fn assert_cleaned_up_once(&self) {
    assert_eq!(self.releases.get(), 1, "input released exactly once");
    assert_eq!(self.closes.get(), 1, "output closed exactly once");
  }
}

fn model(spots: &[(i32, i32)]) -> OccupancyModel {
  let spots = spots
    .iter()
    .enumerate()
    .map(|(index, &(x, y))| {
      let polygon = vec![
        Point::new(x, y),
        Point::new(x + 10, y),
        Point::new(x + 10, y + 10),
        Point::new(x, y + 10),
      ];
      Spot::new(index, polygon, 20).unwrap()
    })
    .collect();
  OccupancyModel::new(spots, FramePreprocessor::new(PreprocessSettings::default()))
}

#[test]
fn end_of_stream_processes_every_spaced_frame() {
  let h = Harness::new();
  let input = h.input(h.frames(5, Duration::from_secs(1)));

  let summary = h
    .task(1)
    .run_task(input, model(&[(5, 5), (30, 20)]), h.sink(Failure::Never))
    .unwrap();

  assert_eq!(summary.exit, TaskExit::EndOfStream);
  assert_eq!(summary.processed, 5);
  assert_eq!(summary.skipped, 0);
  assert_eq!(*h.written.borrow(), vec![0, 1, 2, 3, 4]);
  h.assert_cleaned_up_once();
}

#[test]
fn fast_source_is_sampled_down() {
  let h = Harness::new();
  let input = h.input(h.frames(90, Duration::from_secs(1) / 30));

  let summary = h
    .task(1)
    .run_task(input, model(&[(5, 5)]), h.sink(Failure::Never))
    .unwrap();

  assert_eq!(summary.processed + summary.skipped, 90);
  assert!(
    (2..=3).contains(&summary.processed),
    "processed {}",
    summary.processed
  );
  h.assert_cleaned_up_once();
}

#[test]
fn frame_number_limit_ends_the_run() {
  let h = Harness::new();
  let input = h.input(h.frames(10, Duration::from_secs(1)));

  let summary = h
    .task(1)
    .with_frame_number(Some(3))
    .run_task(input, model(&[(5, 5)]), h.sink(Failure::Never))
    .unwrap();

  assert_eq!(summary.exit, TaskExit::EndOfStream);
  assert_eq!(summary.processed, 3);
  h.assert_cleaned_up_once();
}

#[test]
fn interrupt_stops_before_the_next_frame() {
  let h = Harness::new();
  let input = h.input(h.frames(10, Duration::from_secs(1)));
  let (tx, rx) = mpsc::channel();
  tx.send(()).unwrap();

  let summary = h
    .task(1)
    .with_stop_signal(rx)
    .run_task(input, model(&[(5, 5)]), h.sink(Failure::Never))
    .unwrap();

  assert_eq!(summary.exit, TaskExit::Interrupted);
  assert_eq!(summary.processed, 0);
  assert!(h.written.borrow().is_empty());
  h.assert_cleaned_up_once();
}

#[test]
fn fatal_write_failure_stops_and_cleans_up_once() {
  let h = Harness::new();
  let input = h.input(h.frames(5, Duration::from_secs(1)));

  let err = h
    .task(1)
    .run_task(input, model(&[(5, 5)]), h.sink(Failure::Fatal))
    .unwrap_err();

  assert!(matches!(err, TaskError::Output(OutputError::BackendUnavailable(_))));
  h.assert_cleaned_up_once();
}

#[test]
fn recoverable_failure_does_not_stop_other_sinks() {
  let h = Harness::new();
  let input = h.input(h.frames(4, Duration::from_secs(1)));
  let outputs = FanOut::new(vec![h.sink(Failure::Recoverable), h.sink(Failure::Never)]);

  let summary = h
    .task(1)
    .run_task(input, model(&[(5, 5)]), outputs)
    .unwrap();

  assert_eq!(summary.processed, 4);
  assert_eq!(*h.written.borrow(), vec![0, 1, 2, 3]);
  assert_eq!(h.releases.get(), 1);
  assert_eq!(h.closes.get(), 2, "each sink closed once");
}

#[test]
fn resolution_change_is_fatal() {
  let h = Harness::new();
  let mut frames = h.frames(3, Duration::from_secs(1));
  frames[1] = Ok(Frame::new(
    RgbImage::new(WIDTH * 2, HEIGHT * 2),
    1,
    h.start + Duration::from_secs(2),
  ));

  let err = h
    .task(1)
    .run_task(h.input(frames), model(&[(5, 5)]), h.sink(Failure::Never))
    .unwrap_err();

  match err {
    TaskError::ResolutionChanged { expected, actual } => {
      assert_eq!(expected, Resolution::new(WIDTH, HEIGHT));
      assert_eq!(actual, Resolution::new(WIDTH * 2, HEIGHT * 2));
    }
    other => panic!("unexpected error: {other}"),
  }
  assert_eq!(*h.written.borrow(), vec![0]);
  h.assert_cleaned_up_once();
}

#[test]
fn input_error_is_fatal() {
  let h = Harness::new();
  let mut frames = h.frames(3, Duration::from_secs(1));
  frames[2] = Err(InputError::SchemeMismatch);

  let err = h
    .task(1)
    .run_task(h.input(frames), model(&[(5, 5)]), h.sink(Failure::Never))
    .unwrap_err();

  assert!(matches!(err, TaskError::Input(InputError::SchemeMismatch)));
  assert_eq!(h.written.borrow().len(), 2);
  h.assert_cleaned_up_once();
}

#[test]
fn spot_outside_the_frame_fails_before_reading() {
  let h = Harness::new();
  let input = h.input(h.frames(3, Duration::from_secs(1)));

  let err = h
    .task(1)
    .run_task(input, model(&[(5, 5), (60, 40)]), h.sink(Failure::Never))
    .unwrap_err();

  assert!(matches!(
    err,
    TaskError::Model(ModelError::SpotOutOfFrame { spot: 1, .. })
  ));
  assert!(h.written.borrow().is_empty());
  h.assert_cleaned_up_once();
}

#[test]
fn snapshots_are_written_per_processed_frame() {
  let h = Harness::new();
  let dir = tempfile::tempdir().unwrap();
  let input = h.input(h.frames(3, Duration::from_secs(1)));
  let outputs = FanOut::new(vec![OutputWrapper::Snapshot(SnapshotOutput::new(
    dir.path().to_path_buf(),
  ))]);

  let summary = h
    .task(1)
    .run_task(input, model(&[(5, 5)]), outputs)
    .unwrap();

  assert_eq!(summary.processed, 3);
  for sequence in 0..3 {
    let path = dir.path().join(format!("cam_output_{:04}.jpg", sequence));
    assert!(path.exists(), "missing {}", path.display());
  }
  assert!(!dir.path().join("cam_output_0003.jpg").exists());
}

#[test]
fn one_shot_writes_annotated_and_activity_images() {
  let h = Harness::new();
  let dir = tempfile::tempdir().unwrap();
  let annotated = dir.path().join("annotated.png");
  let activity = dir.path().join("activity.png");

  let report = OneShotTask::new(chewei::output::draw::Annotator::with_font(None))
    .with_activity_output(Some(activity.clone()))
    .run_task(
      h.input(h.frames(2, Duration::from_secs(1))),
      model(&[(5, 5), (30, 20)]),
      ImageFileOutput::new(annotated.clone()),
    )
    .unwrap();

  assert_eq!(report.total(), 2);
  assert_eq!(report.occupied_count(), 0);
  assert_eq!(h.releases.get(), 1);

  let saved = image::open(&annotated).unwrap();
  assert_eq!((saved.width(), saved.height()), (WIDTH, HEIGHT));
  let saved = image::open(&activity).unwrap();
  assert_eq!((saved.width(), saved.height()), (WIDTH, HEIGHT));
}
