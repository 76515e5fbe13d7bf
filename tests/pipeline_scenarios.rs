use anyhow::Result;
use async_trait::async_trait;
use image::{Rgba, RgbaImage};
use pipcam::capture::{FramePublisher, LiveSource, ScreenShareProvider};
use pipcam::compositor::PlacementPreset;
use pipcam::pipeline::{BackgroundSource, Branch, ControlState, Renderer, TickInputs, TickPlan};
use pipcam::segmentation::{SegmentationMask, Segmenter};
use pipcam::{AcquireError, BackgroundSelection, Pip, PipelineConfig, ReducedHeight};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const RED: [u8; 4] = [220, 20, 20, 255];
const BLUE: [u8; 4] = [20, 20, 220, 255];
const GREEN: [u8; 4] = [20, 200, 20, 255];

fn solid(width: u32, height: u32, rgba: [u8; 4]) -> Arc<RgbaImage> {
    Arc::new(RgbaImage::from_pixel(width, height, Rgba(rgba)))
}

fn webcam_pattern(width: u32, height: u32) -> Arc<RgbaImage> {
    Arc::new(RgbaImage::from_fn(width, height, |x, y| {
        Rgba([(x % 251) as u8, (y % 241) as u8, ((x + y) % 256) as u8, 255])
    }))
}

/// Returns a mask of the frame's size filled with one class value.
struct UniformSegmenter {
    class: u8,
    calls: Arc<AtomicUsize>,
    resets: Arc<AtomicUsize>,
}

impl UniformSegmenter {
    fn person() -> Self {
        Self::with_class(1)
    }

    fn with_class(class: u8) -> Self {
        Self {
            class,
            calls: Arc::new(AtomicUsize::new(0)),
            resets: Arc::new(AtomicUsize::new(0)),
        }
    }
}

#[async_trait]
impl Segmenter for UniformSegmenter {
    async fn segment(&mut self, frame: &RgbaImage) -> Result<SegmentationMask> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let (w, h) = frame.dimensions();
        Ok(SegmentationMask::new(w, h, vec![self.class; (w * h) as usize])?)
    }

    fn reset_state(&mut self) {
        self.resets.fetch_add(1, Ordering::SeqCst);
    }
}

/// Returns a fixed mask regardless of the frame.
struct FixedSegmenter(SegmentationMask);

#[async_trait]
impl Segmenter for FixedSegmenter {
    async fn segment(&mut self, _frame: &RgbaImage) -> Result<SegmentationMask> {
        Ok(self.0.clone())
    }
}

struct StalledSegmenter;

#[async_trait]
impl Segmenter for StalledSegmenter {
    async fn segment(&mut self, _frame: &RgbaImage) -> Result<SegmentationMask> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        anyhow::bail!("unreachable")
    }
}

fn renderer(max_height: ReducedHeight) -> Renderer {
    Renderer::new(max_height, Duration::from_millis(200))
}

fn composite(frame: Arc<RgbaImage>, background: BackgroundSource, preset: PlacementPreset) -> TickPlan {
    let screen = match &background {
        BackgroundSource::Stream(share) => {
            Some(share.as_ref().map(|f| f.dimensions()).unwrap_or((0, 0)))
        }
        _ => None,
    };
    TickPlan::Composite {
        frame,
        background,
        preset,
        screen,
    }
}

#[tokio::test]
async fn effect_off_output_is_the_webcam_frame() {
    let frame = webcam_pattern(640, 480);
    let mut renderer = renderer(ReducedHeight::H450);

    let branch = renderer
        .render(TickPlan::Passthrough { frame: frame.clone() }, None)
        .await;

    assert_eq!(branch, Branch::Passthrough);
    assert_eq!(renderer.output().dimensions(), (640, 480));
    assert_eq!(renderer.output().image(), frame.as_ref());
}

#[tokio::test]
async fn passthrough_is_idempotent() {
    let frame = webcam_pattern(320, 240);
    let mut renderer = renderer(ReducedHeight::H180);

    renderer
        .render(TickPlan::Passthrough { frame: frame.clone() }, None)
        .await;
    let first = renderer.output().image().clone();
    renderer
        .render(TickPlan::Passthrough { frame: frame.clone() }, None)
        .await;

    assert_eq!(renderer.output().image(), &first);
}

#[tokio::test]
async fn idle_tick_leaves_output_alone() {
    let mut renderer = renderer(ReducedHeight::H450);
    assert_eq!(renderer.render(TickPlan::Idle, None).await, Branch::Idle);
    assert!(renderer.output().is_empty());
}

#[tokio::test]
async fn composite_without_ready_segmenter_passes_through() {
    let frame = webcam_pattern(64, 48);
    let mut renderer = renderer(ReducedHeight::H90);

    let branch = renderer
        .render(composite(frame.clone(), BackgroundSource::None, PlacementPreset::Small), None)
        .await;

    assert_eq!(branch, Branch::Passthrough);
    assert_eq!(renderer.output().image(), frame.as_ref());
}

#[tokio::test]
async fn opaque_full_frame_matte_over_no_background_equals_webcam() {
    // Reduced height equal to the webcam height keeps every blit unscaled.
    let frame = webcam_pattern(640, 360);
    let mut renderer = renderer(ReducedHeight::H360);
    let mut segmenter = UniformSegmenter::person();

    let branch = renderer
        .render(
            composite(frame.clone(), BackgroundSource::None, PlacementPreset::Full),
            Some(&mut segmenter),
        )
        .await;

    assert_eq!(branch, Branch::Composite);
    assert_eq!(renderer.reduced().dimensions(), (640, 360));
    assert_eq!(renderer.matte().read_pixels(), frame.as_raw().as_slice());
    assert_eq!(renderer.output().image(), frame.as_ref());
}

#[tokio::test]
async fn small_preset_draws_into_bottom_right_over_previous_output() {
    let mut renderer = renderer(ReducedHeight::H360);
    renderer
        .render(TickPlan::Passthrough { frame: solid(640, 360, RED) }, None)
        .await;

    let mut segmenter = UniformSegmenter::person();
    renderer
        .render(
            composite(solid(640, 360, BLUE), BackgroundSource::None, PlacementPreset::Small),
            Some(&mut segmenter),
        )
        .await;

    let out = renderer.output().image();
    assert_eq!(out.dimensions(), (640, 360));
    // Foreground rect: x 480..640, y 270..360.
    assert_eq!(out.get_pixel(10, 10).0, RED);
    assert_eq!(out.get_pixel(479, 359).0, RED);
    assert_eq!(out.get_pixel(480, 270).0, BLUE);
    assert_eq!(out.get_pixel(639, 359).0, BLUE);
}

#[tokio::test]
async fn background_mask_leaves_only_the_backdrop() {
    let mut renderer = renderer(ReducedHeight::H90);
    let mut segmenter = UniformSegmenter::with_class(0);

    renderer
        .render(
            composite(solid(160, 90, BLUE), BackgroundSource::Image(solid(8, 8, GREEN)), PlacementPreset::Full),
            Some(&mut segmenter),
        )
        .await;

    assert!(renderer.matte().read_pixels().iter().all(|&b| b == 0));
    assert!(renderer.output().image().pixels().all(|p| p.0 == GREEN));
}

#[tokio::test]
async fn still_background_is_drawn_at_webcam_resolution() {
    let mut renderer = renderer(ReducedHeight::H90);
    let mut segmenter = UniformSegmenter::person();

    renderer
        .render(
            composite(solid(160, 90, BLUE), BackgroundSource::Image(solid(1920, 1080, GREEN)), PlacementPreset::Intermediate),
            Some(&mut segmenter),
        )
        .await;

    let out = renderer.output().image();
    assert_eq!(out.dimensions(), (160, 90));
    assert_eq!(out.get_pixel(0, 0).0, GREEN);
    assert_eq!(out.get_pixel(120, 70).0, BLUE);
}

#[tokio::test]
async fn screen_share_background_sets_output_size_and_keeps_webcam_aspect() {
    let mut renderer = renderer(ReducedHeight::H90);
    let mut segmenter = UniformSegmenter::person();
    let share = solid(1280, 720, GREEN);

    renderer
        .render(
            composite(solid(120, 90, BLUE), BackgroundSource::Stream(Some(share)), PlacementPreset::Small),
            Some(&mut segmenter),
        )
        .await;

    let out = renderer.output().image();
    assert_eq!(out.dimensions(), (1280, 720));
    // 4:3 webcam over 720p: 0.25 * 720 * 4/3 = 240 wide, 180 tall at (960, 540).
    assert_eq!(out.get_pixel(959, 600).0, GREEN);
    assert_eq!(out.get_pixel(960, 540).0, BLUE);
    assert_eq!(out.get_pixel(1199, 719).0, BLUE);
    assert_eq!(out.get_pixel(1200, 719).0, GREEN);
}

#[tokio::test]
async fn still_background_over_attached_share_places_by_webcam_size() {
    let mut renderer = renderer(ReducedHeight::H90);
    let mut segmenter = UniformSegmenter::person();
    let plan = TickPlan::decide(TickInputs {
        controls: ControlState {
            effect_on: true,
            background: BackgroundSelection::Image,
            preset: PlacementPreset::Small,
        },
        webcam: Some(solid(160, 120, BLUE)),
        screen: Some(Some(solid(1280, 720, RED))),
        background_image: Some(solid(8, 8, GREEN)),
    });

    renderer.render(plan, Some(&mut segmenter)).await;

    let out = renderer.output().image();
    assert_eq!(out.dimensions(), (160, 120));
    // Small over the webcam canvas: (120, 90) 40x30.
    assert_eq!(out.get_pixel(119, 89).0, GREEN);
    assert_eq!(out.get_pixel(120, 90).0, BLUE);
    assert_eq!(out.get_pixel(159, 119).0, BLUE);
}

#[tokio::test]
async fn empty_mask_draws_nothing_new() {
    let mut renderer = renderer(ReducedHeight::H90);
    renderer
        .render(TickPlan::Passthrough { frame: solid(160, 90, RED) }, None)
        .await;

    let empty = SegmentationMask::new(0, 0, Vec::new()).unwrap();
    let mut segmenter = FixedSegmenter(empty);
    let branch = renderer
        .render(
            composite(solid(160, 90, BLUE), BackgroundSource::None, PlacementPreset::Full),
            Some(&mut segmenter),
        )
        .await;

    assert_eq!(branch, Branch::Composite);
    assert_eq!(renderer.matte().dimensions(), (160, 90));
    assert!(renderer.output().image().pixels().all(|p| p.0 == RED));
}

#[tokio::test]
async fn mismatched_mask_falls_back_to_passthrough() {
    let mut renderer = renderer(ReducedHeight::H90);
    let mask = SegmentationMask::new(2, 2, vec![1; 4]).unwrap();
    let mut segmenter = FixedSegmenter(mask);
    let frame = solid(160, 90, BLUE);

    let branch = renderer
        .render(
            composite(frame.clone(), BackgroundSource::None, PlacementPreset::Small),
            Some(&mut segmenter),
        )
        .await;

    assert_eq!(branch, Branch::Passthrough);
    assert_eq!(renderer.output().image(), frame.as_ref());
}

#[tokio::test]
async fn stalled_segmentation_is_cut_off_by_the_watchdog() {
    let mut renderer = Renderer::new(ReducedHeight::H90, Duration::from_millis(20));
    let frame = solid(160, 90, BLUE);

    let branch = tokio::time::timeout(
        Duration::from_secs(5),
        renderer.render(
            composite(frame.clone(), BackgroundSource::None, PlacementPreset::Small),
            Some(&mut StalledSegmenter),
        ),
    )
    .await
    .expect("watchdog should fire");

    assert_eq!(branch, Branch::Passthrough);
    assert_eq!(renderer.output().image(), frame.as_ref());
}

// ── Pipeline handle ──────────────────────────────────────────────────────────

#[derive(Default)]
struct FakeShare {
    deny: bool,
    publishers: Mutex<Vec<FramePublisher>>,
}

impl FakeShare {
    fn end_stream(&self) {
        self.publishers.lock().unwrap().clear();
    }
}

#[async_trait]
impl ScreenShareProvider for FakeShare {
    async fn acquire(&self) -> Result<LiveSource, AcquireError> {
        if self.deny {
            return Err(AcquireError::PermissionDenied {
                reason: "user dismissed the picker".into(),
            });
        }
        let (publisher, source) = LiveSource::channel("screen-share");
        publisher.publish(RgbaImage::from_pixel(320, 180, Rgba(GREEN)));
        self.publishers.lock().unwrap().push(publisher);
        Ok(source)
    }
}

fn fast_config() -> PipelineConfig {
    PipelineConfig {
        max_reduced_height: ReducedHeight::H90,
        frame_budget: Duration::from_millis(10),
        ..Default::default()
    }
}

async fn next_frame(
    stream: &mut tokio::sync::watch::Receiver<Option<Arc<RgbaImage>>>,
    accept: impl Fn(&RgbaImage) -> bool,
) -> Arc<RgbaImage> {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            stream.changed().await.expect("pipeline alive");
            if let Some(frame) = stream.borrow_and_update().clone() {
                if accept(&frame) {
                    return frame;
                }
            }
        }
    })
    .await
    .expect("expected frame within 5s")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn render_loop_streams_passthrough_frames() {
    let pip = Pip::new(fast_config(), Arc::new(FakeShare::default())).unwrap();
    let (publisher, webcam) = LiveSource::channel("webcam");
    let frame = webcam_pattern(160, 120);
    publisher.publish(frame.as_ref().clone());
    pip.attach_stream(webcam);

    let mut stream = pip.capture_stream();
    let render = pip.initialize_render().await.unwrap();

    let out = next_frame(&mut stream, |_| true).await;
    assert_eq!(out.as_ref(), frame.as_ref());

    render.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn render_loop_composites_once_segmenter_is_installed() {
    let pip = Pip::new(fast_config(), Arc::new(FakeShare::default())).unwrap();
    let (publisher, webcam) = LiveSource::channel("webcam");
    publisher.publish(RgbaImage::from_pixel(160, 90, Rgba(BLUE)));
    pip.attach_stream(webcam);
    pip.set_background_image(Some(RgbaImage::from_pixel(16, 9, Rgba(GREEN))));
    pip.set_video_size(PlacementPreset::Intermediate);
    pip.turn_effect_on(true);

    let segmenter = UniformSegmenter::person();
    let calls = Arc::clone(&segmenter.calls);
    let mut stream = pip.capture_stream();
    let render = pip.initialize_render().await.unwrap();
    pip.install_segmenter(Box::new(segmenter)).unwrap();

    let out = next_frame(&mut stream, |f| f.get_pixel(0, 0).0 == GREEN).await;
    assert_eq!(out.get_pixel(120, 70).0, BLUE);
    assert!(calls.load(Ordering::SeqCst) >= 1);

    render.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn attaching_a_new_webcam_resets_segmenter_state() {
    let pip = Pip::new(fast_config(), Arc::new(FakeShare::default())).unwrap();
    let segmenter = UniformSegmenter::person();
    let resets = Arc::clone(&segmenter.resets);
    pip.install_segmenter(Box::new(segmenter)).unwrap();
    pip.turn_effect_on(true);

    let (first_pub, first) = LiveSource::channel("webcam");
    first_pub.publish(RgbaImage::from_pixel(160, 90, Rgba(RED)));
    pip.attach_stream(first);
    let render = pip.initialize_render().await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let (second_pub, second) = LiveSource::channel("webcam");
    second_pub.publish(RgbaImage::from_pixel(160, 90, Rgba(BLUE)));
    pip.attach_stream(second);

    tokio::time::timeout(Duration::from_secs(5), async {
        while resets.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("segmenter should be reset");

    render.stop().await;
}

#[tokio::test]
async fn render_loop_starts_only_once() {
    let pip = Pip::new(fast_config(), Arc::new(FakeShare::default())).unwrap();
    let render = pip.initialize_render().await.unwrap();
    assert!(pip.initialize_render().await.is_err());
    render.stop().await;
}

#[tokio::test]
async fn render_handle_stop_ends_the_loop() {
    let pip = Pip::new(fast_config(), Arc::new(FakeShare::default())).unwrap();
    let render = pip.initialize_render().await.unwrap();
    let token = render.cancel_token();
    tokio::time::timeout(Duration::from_secs(5), render.stop())
        .await
        .expect("loop should stop");
    assert!(token.is_cancelled());
}

#[tokio::test]
async fn starting_screen_share_switches_to_stream_small_effect_on() {
    let pip = Pip::new(fast_config(), Arc::new(FakeShare::default())).unwrap();
    pip.set_video_size(PlacementPreset::Full);

    pip.start_screen_share().await.unwrap();

    assert_eq!(
        pip.controls(),
        ControlState {
            effect_on: true,
            background: BackgroundSelection::Stream,
            preset: PlacementPreset::Small,
        }
    );

    pip.stop_screen_share();
    let state = pip.controls();
    assert!(!state.effect_on);
    assert_eq!(state.background, BackgroundSelection::None);
}

#[tokio::test]
async fn denied_screen_share_leaves_state_untouched() {
    let share = FakeShare {
        deny: true,
        ..Default::default()
    };
    let pip = Pip::new(fast_config(), Arc::new(share)).unwrap();
    let before = pip.controls();

    let err = pip.start_screen_share().await.unwrap_err();

    assert!(matches!(err, AcquireError::PermissionDenied { .. }));
    assert_eq!(pip.controls(), before);
}

#[tokio::test]
async fn stream_background_without_share_is_acquired_on_start() {
    let share = Arc::new(FakeShare::default());
    let pip = Pip::new(fast_config(), share.clone()).unwrap();
    pip.select_background(BackgroundSelection::Stream);

    pip.set_video_size(PlacementPreset::Full);

    let render = pip.initialize_render().await.unwrap();

    assert_eq!(share.publishers.lock().unwrap().len(), 1);
    // Acquiring the share on start keeps the caller's effect flag and layout.
    assert_eq!(
        pip.controls(),
        ControlState {
            effect_on: false,
            background: BackgroundSelection::Stream,
            preset: PlacementPreset::Full,
        }
    );
    render.stop().await;
}

#[tokio::test]
async fn clearing_the_still_keeps_an_active_share_selected() {
    let pip = Pip::new(fast_config(), Arc::new(FakeShare::default())).unwrap();
    pip.start_screen_share().await.unwrap();

    pip.set_background_image(None);
    assert_eq!(pip.controls().background, BackgroundSelection::Stream);

    pip.set_background_image(Some(RgbaImage::from_pixel(4, 4, Rgba(GREEN))));
    assert_eq!(pip.controls().background, BackgroundSelection::Image);
    pip.set_background_image(None);
    assert_eq!(pip.controls().background, BackgroundSelection::None);
}

#[tokio::test]
async fn failed_share_on_start_keeps_loop_startable() {
    let share = FakeShare {
        deny: true,
        ..Default::default()
    };
    let pip = Pip::new(fast_config(), Arc::new(share)).unwrap();
    pip.select_background(BackgroundSelection::Stream);
    assert!(pip.initialize_render().await.is_err());

    pip.select_background(BackgroundSelection::None);
    let render = pip.initialize_render().await.unwrap();
    render.stop().await;
}

#[tokio::test]
async fn share_ended_by_source_stops_share_and_notifies() {
    let share = Arc::new(FakeShare::default());
    let notified = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&notified);
    let pip = Pip::new(fast_config(), share.clone())
        .unwrap()
        .with_on_stop_screen_share(move || flag.store(true, Ordering::SeqCst))
        .unwrap();

    pip.start_screen_share().await.unwrap();
    share.end_stream();

    tokio::time::timeout(Duration::from_secs(5), async {
        while !notified.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("callback should run");

    let state = pip.controls();
    assert!(!state.effect_on);
    assert_eq!(state.background, BackgroundSelection::None);
}

#[tokio::test]
async fn user_stop_does_not_fire_end_callback() {
    let share = Arc::new(FakeShare::default());
    let notified = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&notified);
    let pip = Pip::new(fast_config(), share.clone())
        .unwrap()
        .with_on_stop_screen_share(move || flag.store(true, Ordering::SeqCst))
        .unwrap();

    pip.start_screen_share().await.unwrap();
    pip.stop_screen_share();
    share.end_stream();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(!notified.load(Ordering::SeqCst));
}
