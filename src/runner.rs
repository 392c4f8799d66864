use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::block::{Block, WorldState};
use crate::chain::stage::FrameContext;
use crate::chain::Chain;
use crate::context::RunContext;
use crate::display::{DisplaySurface, KeyCommand};
use crate::error::{RunError, StageError};
use crate::link::{Command, HostLink};
use crate::source::{FrameSet, FrameSource};

enum FrameSignal {
    Continue,
    Quit,
}

/// The frame loop: drives acquisition, chain execution, output delivery,
/// the inter-frame key wait, host publication and host commands, once per
/// frame until the source is exhausted, then runs the analysis pass.
pub struct Runner<S, D> {
    chain: Chain,
    source: S,
    display: D,
    link: HostLink,
    ctx: RunContext,
    blocks: Vec<Block>,
    outputs: Vec<Block>,
    world: WorldState,
    pause_ms: i64,
    out_dir: PathBuf,
}

impl<S: FrameSource, D: DisplaySurface> Runner<S, D> {
    pub fn new(
        chain: Chain,
        source: S,
        display: D,
        link: HostLink,
        pause_ms: i64,
        out_dir: PathBuf,
    ) -> Self {
        let ctx = RunContext::new(chain.task());
        Self {
            chain,
            source,
            display,
            link,
            ctx,
            blocks: Vec::new(),
            outputs: Vec::new(),
            world: WorldState::default(),
            pause_ms,
            out_dir,
        }
    }

    pub fn frames_processed(&self) -> u64 {
        self.ctx.frame_id
    }

    pub fn run(&mut self) -> Result<(), RunError> {
        info!(
            run_id = %self.ctx.run_id,
            stereo = self.source.is_stereo(),
            stages = self.chain.len(),
            "run starting"
        );
        self.link.notice("stereoflow opened");

        loop {
            let Some(frames) = self.source.fetch()? else {
                info!("source exhausted, finishing run");
                break;
            };
            self.begin_frame(frames);
            self.link
                .notice(&format!("Frame {} Begin.", self.ctx.frame_id));

            if let Err(e) = self.run_chain() {
                self.link.notice("stereoflow aborted");
                return Err(RunError::Fatal(e));
            }
            self.deliver_outputs();

            match self.interframe_wait() {
                FrameSignal::Continue => {}
                FrameSignal::Quit => break,
            }

            self.ctx.frame_id += 1;
            self.link.publish(&self.outputs, &self.world);
            match self.link.poll_command() {
                Command::Terminate => {
                    info!("terminate command received");
                    break;
                }
                Command::Pause => {
                    info!("pause command received, waiting for resume");
                    self.link.notice("stereoflow paused");
                    self.link.wait_resume();
                    self.link.notice("stereoflow continued");
                }
                Command::Idle => {}
            }
            self.link.notice("Process Finished.");
        }

        self.analysis()?;
        self.link.notice("stereoflow closed");
        Ok(())
    }

    /// Reset all transient per-frame state and take in the new frames.
    fn begin_frame(&mut self, frames: FrameSet) {
        self.ctx.begin_frame();
        self.blocks.clear();
        self.outputs.clear();
        self.world.reset();
        match frames {
            FrameSet::Mono(image) => {
                self.blocks.push(Block::new("left", image));
            }
            FrameSet::Stereo(left, right) => {
                self.blocks.push(Block::new("left", left));
                self.blocks.push(Block::new("right", right));
            }
        }
        info!(frame = self.ctx.frame_id, "frame begin");
    }

    /// Execute the chain in order. A stage failure truncates the rest of
    /// this frame's chain; a fatal error propagates and ends the run.
    fn run_chain(&mut self) -> Result<(), StageError> {
        for node in self.chain.nodes_mut() {
            let world = node.uses_world.then_some(&mut self.world);
            let mut frame = FrameContext {
                run: &mut self.ctx,
                blocks: &mut self.blocks,
                outputs: &mut self.outputs,
                world,
                display: &mut self.display,
            };
            match node.stage.execute(&mut frame) {
                Ok(()) => {}
                Err(e) if e.is_fatal() => {
                    error!(stage = %node.name, error = %e, "fatal stage error");
                    return Err(e);
                }
                Err(e) => {
                    warn!(stage = %node.name, error = %e, "stage failed, frame truncated");
                    break;
                }
            }
        }
        Ok(())
    }

    fn deliver_outputs(&mut self) {
        for output in &self.outputs {
            if output.show {
                self.display.show(&output.name, &output.image);
            }
            if output.save {
                let stem = format!("{} {}", output.name, self.ctx.frame_label);
                if let Err(e) = self.display.save(&stem, &output.image) {
                    warn!(name = %output.name, error = %e, "failed to save output");
                }
            }
        }
    }

    fn interframe_wait(&mut self) -> FrameSignal {
        if self.pause_ms < 0 {
            return FrameSignal::Continue;
        }
        match self
            .display
            .wait_key(Some(Duration::from_millis(self.pause_ms as u64)))
        {
            Some(KeyCommand::Quit) => {
                info!("quit key, ending run");
                FrameSignal::Quit
            }
            Some(KeyCommand::Abort) => {
                error!("abort key, terminating immediately");
                std::process::exit(1);
            }
            Some(KeyCommand::Pause) => {
                info!("paused, waiting for any key");
                let _ = self.display.wait_key(None);
                FrameSignal::Continue
            }
            Some(KeyCommand::Reinit) => {
                info!("tracker reinit requested");
                self.ctx.reinit_requested = true;
                FrameSignal::Continue
            }
            None => FrameSignal::Continue,
        }
    }

    /// Post-run analysis: render the metric sheet to the report file.
    fn analysis(&mut self) -> Result<(), RunError> {
        self.link.notice("Analysis Data.");
        std::fs::create_dir_all(&self.out_dir).map_err(RunError::Report)?;
        let path = self.out_dir.join(format!("A_{}.txt", self.ctx.run_label));
        self.ctx.metrics.write_report(&path).map_err(RunError::Report)?;
        info!(path = %path.display(), "analysis report saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::stage::Stage;
    use crate::chain::ExecutionNode;
    use crate::context::TaskCategory;
    use crate::display::HeadlessSurface;
    use crate::error::SourceError;
    use image::DynamicImage;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    struct VecSource {
        remaining: usize,
    }

    impl FrameSource for VecSource {
        fn is_stereo(&self) -> bool {
            false
        }

        fn fetch(&mut self) -> Result<Option<FrameSet>, SourceError> {
            if self.remaining == 0 {
                return Ok(None);
            }
            self.remaining -= 1;
            Ok(Some(FrameSet::Mono(DynamicImage::new_rgb8(8, 8))))
        }
    }

    struct ScriptedSurface {
        keys: VecDeque<Option<KeyCommand>>,
    }

    impl DisplaySurface for ScriptedSurface {
        fn show(&mut self, _name: &str, _image: &DynamicImage) {}

        fn save(&mut self, _stem: &str, _image: &DynamicImage) -> std::io::Result<()> {
            Ok(())
        }

        fn wait_key(&mut self, _timeout: Option<Duration>) -> Option<KeyCommand> {
            self.keys.pop_front().flatten()
        }

        fn select_rect(&mut self, _name: &str, _image: &DynamicImage) -> Option<crate::block::Rect> {
            None
        }
    }

    /// Counts executions and records the frame ids and reinit flags it
    /// observed.
    struct ProbeStage {
        counter: Arc<AtomicU64>,
        seen: Arc<std::sync::Mutex<Vec<(u64, bool)>>>,
        fail_at: Option<u64>,
    }

    impl Stage for ProbeStage {
        fn label(&self) -> &str {
            "probe"
        }

        fn execute(&mut self, ctx: &mut FrameContext<'_>) -> Result<(), StageError> {
            if self.fail_at == Some(ctx.run.frame_id) {
                return Err(StageError::Failed("scripted failure".to_string()));
            }
            self.counter.fetch_add(1, Ordering::SeqCst);
            self.seen
                .lock()
                .unwrap()
                .push((ctx.run.frame_id, ctx.run.reinit_requested));
            Ok(())
        }
    }

    fn probe_chain(probes: Vec<ProbeStage>) -> Chain {
        let nodes = probes
            .into_iter()
            .enumerate()
            .map(|(i, p)| ExecutionNode {
                name: format!("probe{i}"),
                category: TaskCategory::Show,
                uses_world: false,
                stage: Box::new(p) as Box<dyn Stage>,
            })
            .collect();
        Chain::new(nodes, TaskCategory::Show)
    }

    fn probe(counter: &Arc<AtomicU64>) -> ProbeStage {
        ProbeStage {
            counter: counter.clone(),
            seen: Arc::new(std::sync::Mutex::new(Vec::new())),
            fail_at: None,
        }
    }

    fn out_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("stereoflow-run-{tag}-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        dir
    }

    #[test]
    fn test_run_processes_every_frame_and_writes_report() {
        let counter = Arc::new(AtomicU64::new(0));
        let dir = out_dir("all");
        let mut runner = Runner::new(
            probe_chain(vec![probe(&counter)]),
            VecSource { remaining: 3 },
            HeadlessSurface::new(dir.clone()),
            HostLink::disabled(),
            -1,
            dir.clone(),
        );
        runner.run().unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 3);
        assert_eq!(runner.frames_processed(), 3);
        let reports: Vec<_> = std::fs::read_dir(&dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with("A_"))
            .collect();
        assert_eq!(reports.len(), 1);
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_stage_failure_truncates_only_that_frame() {
        let counter = Arc::new(AtomicU64::new(0));
        let failer = ProbeStage {
            counter: Arc::new(AtomicU64::new(0)),
            seen: Arc::new(std::sync::Mutex::new(Vec::new())),
            fail_at: Some(1),
        };
        let downstream = probe(&counter);
        let dir = out_dir("trunc");
        let mut runner = Runner::new(
            probe_chain(vec![failer, downstream]),
            VecSource { remaining: 3 },
            HeadlessSurface::new(dir.clone()),
            HostLink::disabled(),
            -1,
            dir.clone(),
        );
        runner.run().unwrap();
        // Frame 1 was truncated before the downstream probe; frames 0
        // and 2 went through the whole chain.
        assert_eq!(counter.load(Ordering::SeqCst), 2);
        assert_eq!(runner.frames_processed(), 3);
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_quit_key_ends_run_early() {
        let counter = Arc::new(AtomicU64::new(0));
        let dir = out_dir("quit");
        let mut runner = Runner::new(
            probe_chain(vec![probe(&counter)]),
            VecSource { remaining: 100 },
            ScriptedSurface {
                keys: VecDeque::from([None, Some(KeyCommand::Quit)]),
            },
            HostLink::disabled(),
            0,
            dir.clone(),
        );
        runner.run().unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 2);
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_reinit_key_sets_flag_for_next_frame() {
        let counter = Arc::new(AtomicU64::new(0));
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let probe = ProbeStage {
            counter: counter.clone(),
            seen: seen.clone(),
            fail_at: None,
        };
        let dir = out_dir("reinit");
        let mut runner = Runner::new(
            probe_chain(vec![probe]),
            VecSource { remaining: 2 },
            ScriptedSurface {
                keys: VecDeque::from([Some(KeyCommand::Reinit), None]),
            },
            HostLink::disabled(),
            0,
            dir.clone(),
        );
        runner.run().unwrap();
        // The flag set during frame 0's wait is visible to frame 1.
        assert_eq!(*seen.lock().unwrap(), vec![(0, false), (1, true)]);
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_fatal_stage_error_aborts_run() {
        struct FatalStage;
        impl Stage for FatalStage {
            fn label(&self) -> &str {
                "fatal"
            }
            fn execute(&mut self, _ctx: &mut FrameContext<'_>) -> Result<(), StageError> {
                Err(StageError::SizeDrift {
                    expected: (8, 8),
                    actual: (4, 4),
                })
            }
        }
        let chain = Chain::new(
            vec![ExecutionNode {
                name: "fatal".to_string(),
                category: TaskCategory::Show,
                uses_world: false,
                stage: Box::new(FatalStage),
            }],
            TaskCategory::Show,
        );
        let dir = out_dir("fatal");
        let mut runner = Runner::new(
            chain,
            VecSource { remaining: 5 },
            HeadlessSurface::new(dir.clone()),
            HostLink::disabled(),
            -1,
            dir.clone(),
        );
        assert!(matches!(runner.run(), Err(RunError::Fatal(_))));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_pause_command_stops_frames_until_resume() {
        use std::io::{Read, Write};
        use std::net::TcpListener;
        use crate::config::LinkSettings;

        let listeners: Vec<TcpListener> = (0..3)
            .map(|_| TcpListener::bind("127.0.0.1:0").unwrap())
            .collect();
        let settings = LinkSettings {
            enabled: true,
            host: "127.0.0.1".to_string(),
            command_port: listeners[0].local_addr().unwrap().port(),
            data_port: listeners[1].local_addr().unwrap().port(),
            info_port: listeners[2].local_addr().unwrap().port(),
        };

        let counter = Arc::new(AtomicU64::new(0));
        let host_counter = counter.clone();

        let host = std::thread::spawn(move || {
            let (mut command, _) = listeners[0].accept().unwrap();
            let (mut data, _) = listeners[1].accept().unwrap();
            data.set_nonblocking(true).unwrap();
            let (mut info, _) = listeners[2].accept().unwrap();
            info.set_nonblocking(true).unwrap();

            let mut drain = vec![0u8; 1 << 16];
            let mut drain_data = move |data: &mut std::net::TcpStream| {
                loop {
                    match data.read(&mut drain) {
                        Ok(0) => break,
                        Ok(_) => {}
                        Err(_) => break,
                    }
                }
                loop {
                    match info.read(&mut drain) {
                        Ok(0) => break,
                        Ok(_) => {}
                        Err(_) => break,
                    }
                }
            };

            // Ask for a pause, then wait until the pipeline stops
            // making progress.
            command.write_all(&2i32.to_le_bytes()).unwrap();
            let mut last = host_counter.load(Ordering::SeqCst);
            let mut stable = 0;
            while stable < 5 {
                std::thread::sleep(Duration::from_millis(10));
                drain_data(&mut data);
                let now = host_counter.load(Ordering::SeqCst);
                if now == last {
                    stable += 1;
                } else {
                    stable = 0;
                    last = now;
                }
            }
            let paused_at = host_counter.load(Ordering::SeqCst);

            // While paused, zero frames go through.
            for _ in 0..10 {
                std::thread::sleep(Duration::from_millis(10));
                drain_data(&mut data);
            }
            let still_paused_at = host_counter.load(Ordering::SeqCst);

            // Resume, confirm progress, then terminate.
            command.write_all(&3i32.to_le_bytes()).unwrap();
            let resumed = loop {
                std::thread::sleep(Duration::from_millis(5));
                drain_data(&mut data);
                let now = host_counter.load(Ordering::SeqCst);
                if now > still_paused_at {
                    break now;
                }
            };
            command.write_all(&1i32.to_le_bytes()).unwrap();
            // Keep draining long enough for the terminate to be seen.
            for _ in 0..100 {
                drain_data(&mut data);
                std::thread::sleep(Duration::from_millis(5));
            }
            (paused_at, still_paused_at, resumed)
        });

        let dir = out_dir("pause");
        let mut runner = Runner::new(
            probe_chain(vec![probe(&counter)]),
            VecSource {
                remaining: 1_000_000,
            },
            HeadlessSurface::new(dir.clone()),
            HostLink::connect(&settings),
            -1,
            dir.clone(),
        );
        runner.run().unwrap();

        let (paused_at, still_paused_at, resumed) = host.join().unwrap();
        assert_eq!(paused_at, still_paused_at, "frames processed while paused");
        assert!(resumed > still_paused_at);
        assert!(runner.frames_processed() < 1_000_000);
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
