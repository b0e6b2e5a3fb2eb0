//! Command dispatcher: turns a stream of slider movements into a bounded-rate
//! stream of joint frames.
//!
//! # Debounce (for beginners)
//!
//! Dragging a slider fires dozens of change events per second.  The arm's
//! microcontroller reads its serial port slowly, so sending every event would
//! queue up stale positions.  Instead each joint has one *pending send* slot:
//!
//! ```text
//! change(J0, 10) ──┐ schedule send in 40ms
//! change(J0, 12) ──┤ cancel previous, schedule again
//! change(J0, 15) ──┘ cancel previous, schedule again
//!                    ... 40ms of quiet ...
//!                    "J 0 15\n" is written once
//! ```
//!
//! A slot is a Tokio task that sleeps for the quiet period and then queues the
//! command.  Rescheduling aborts the old task and spawns a new one.  Slots are
//! independent, so a burst on one joint never delays another.
//!
//! # Writer task
//!
//! Frames are written by one writer task per connection, in queue order, on
//! the blocking thread pool.  Callers only push onto an unbounded channel, so
//! submitting a command never blocks.  Every write outcome is reported as a
//! [`DispatchEvent`] for the operator log.

use std::sync::Arc;
use std::time::Duration;

use arm_core::{encode_frame, Angle, ArmPose, Joint, JointCommand, JOINT_COUNT};
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, error, warn};

use crate::application::link::{LinkError, SerialLink};

/// Outcome of a frame write, reported to the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchEvent {
    /// `frame` was written to the device.
    Sent { command: JointCommand, frame: String },
    /// The write failed; the connection stays up.
    WriteFailed { command: JointCommand, error: String },
}

impl DispatchEvent {
    /// Formats the event for the operator log.
    pub fn log_entry(&self) -> String {
        match self {
            DispatchEvent::Sent { frame, .. } => format!("TX: {}", frame.trim_end()),
            DispatchEvent::WriteFailed { error, .. } => format!("TX error: {error}"),
        }
    }
}

/// Channel into the writer task of the current connection.
struct Outbound {
    queue: mpsc::UnboundedSender<JointCommand>,
    writer: JoinHandle<()>,
}

/// Debounces per-joint changes and writes frames through the attached link.
///
/// While no link is attached every send is silently dropped; the pose is still
/// tracked so it can be synchronised after the next connect.
pub struct CommandDispatcher {
    quiet_period: Duration,
    pose: ArmPose,
    pending: [Option<JoinHandle<()>>; JOINT_COUNT],
    outbound: Option<Outbound>,
    events: mpsc::UnboundedSender<DispatchEvent>,
}

impl CommandDispatcher {
    /// Creates a detached dispatcher together with its event receiver.
    pub fn new(quiet_period: Duration) -> (Self, mpsc::UnboundedReceiver<DispatchEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let dispatcher = Self {
            quiet_period,
            pose: ArmPose::home(),
            pending: Default::default(),
            outbound: None,
            events,
        };
        (dispatcher, rx)
    }

    /// Routes future frames to `link`.  Must be called inside a Tokio runtime.
    pub fn attach(&mut self, link: Arc<dyn SerialLink>) {
        self.detach();
        let (queue, rx) = mpsc::unbounded_channel();
        let writer = tokio::spawn(run_writer(link, rx, self.events.clone()));
        self.outbound = Some(Outbound { queue, writer });
    }

    /// Cancels every pending send and stops the writer task.
    ///
    /// Commands still waiting in the writer queue are discarded, so nothing is
    /// written once the link is about to close.
    pub fn detach(&mut self) {
        let cancelled = self.cancel_pending();
        if let Some(outbound) = self.outbound.take() {
            outbound.writer.abort();
            debug!(cancelled, "dispatcher detached");
        }
    }

    pub fn is_attached(&self) -> bool {
        self.outbound.is_some()
    }

    /// The last requested angle of every joint.
    pub fn pose(&self) -> ArmPose {
        self.pose
    }

    /// Number of joints with a debounced send still waiting.
    pub fn pending_count(&self) -> usize {
        self.pending
            .iter()
            .flatten()
            .filter(|handle| !handle.is_finished())
            .count()
    }

    /// Records a slider movement and (re)schedules the joint's debounced send.
    pub fn on_joint_changed(&mut self, joint: Joint, raw_angle: i64) {
        let command = JointCommand::new(joint, Angle::clamped(raw_angle));
        self.pose.set(joint, command.angle);

        let Some(outbound) = &self.outbound else {
            debug!(%joint, "not connected; change recorded but not sent");
            return;
        };

        let slot = &mut self.pending[joint.index()];
        if let Some(previous) = slot.take() {
            previous.abort();
        }

        let queue = outbound.queue.clone();
        let quiet_period = self.quiet_period;
        *slot = Some(tokio::spawn(async move {
            tokio::time::sleep(quiet_period).await;
            let _ = queue.send(command);
        }));
    }

    /// Sends `joint` immediately, bypassing (and cancelling) its debounce slot.
    pub fn send_now(&mut self, joint: Joint, raw_angle: i64) {
        let command = JointCommand::new(joint, Angle::clamped(raw_angle));
        self.pose.set(joint, command.angle);

        if let Some(previous) = self.pending[joint.index()].take() {
            previous.abort();
        }
        self.enqueue(command);
    }

    /// Sends the whole current pose, joint 0 first.
    pub fn send_all(&mut self) {
        let pose = self.pose;
        for command in pose.commands() {
            self.send_now(command.joint, command.angle.degrees() as i64);
        }
    }

    /// Moves every joint back to [`Angle::HOME`] and sends the pose.
    pub fn reset_to_default(&mut self) {
        self.pose = ArmPose::home();
        self.send_all();
    }

    fn enqueue(&self, command: JointCommand) {
        match &self.outbound {
            Some(outbound) => {
                let _ = outbound.queue.send(command);
            }
            None => debug!(joint = %command.joint, "not connected; send ignored"),
        }
    }

    fn cancel_pending(&mut self) -> usize {
        let mut cancelled = 0;
        for slot in &mut self.pending {
            if let Some(handle) = slot.take() {
                if !handle.is_finished() {
                    cancelled += 1;
                }
                handle.abort();
            }
        }
        cancelled
    }
}

impl Drop for CommandDispatcher {
    fn drop(&mut self) {
        self.detach();
    }
}

/// Writes queued commands in order until the queue closes or the task is
/// aborted.
async fn run_writer(
    link: Arc<dyn SerialLink>,
    mut queue: mpsc::UnboundedReceiver<JointCommand>,
    events: mpsc::UnboundedSender<DispatchEvent>,
) {
    while let Some(command) = queue.recv().await {
        let frame = encode_frame(&command);
        let write = {
            let link = Arc::clone(&link);
            let frame = frame.clone();
            tokio::task::spawn_blocking(move || link.write_frame(&frame))
        };

        match write.await {
            Ok(Ok(())) => {
                debug!(frame = frame.trim_end(), "frame written");
                let _ = events.send(DispatchEvent::Sent { command, frame });
            }
            Ok(Err(LinkError::NotOpen)) => {
                debug!(frame = frame.trim_end(), "link closed; frame dropped");
            }
            Ok(Err(e)) => {
                warn!(frame = frame.trim_end(), "frame write failed: {e}");
                let _ = events.send(DispatchEvent::WriteFailed {
                    command,
                    error: e.to_string(),
                });
            }
            Err(e) => error!("frame writer task failed: {e}"),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    /// Records every frame written; optionally fails writes.
    #[derive(Default)]
    struct RecordingLink {
        frames: Mutex<Vec<String>>,
        fail_writes: AtomicBool,
    }

    impl RecordingLink {
        fn frames(&self) -> Vec<String> {
            self.frames.lock().unwrap().clone()
        }
    }

    impl SerialLink for RecordingLink {
        fn port_name(&self) -> &str {
            "recording"
        }
        fn is_open(&self) -> bool {
            true
        }
        fn write_frame(&self, frame: &str) -> Result<(), LinkError> {
            if self.fail_writes.load(Ordering::Relaxed) {
                return Err(LinkError::Write(std::io::Error::from(
                    std::io::ErrorKind::TimedOut,
                )));
            }
            self.frames.lock().unwrap().push(frame.to_string());
            Ok(())
        }
        fn read_line(&self, _timeout: Duration) -> Result<Option<String>, LinkError> {
            Ok(None)
        }
        fn close(&self) {}
    }

    const QUIET: Duration = Duration::from_millis(40);

    fn attached() -> (
        CommandDispatcher,
        mpsc::UnboundedReceiver<DispatchEvent>,
        Arc<RecordingLink>,
    ) {
        let link = Arc::new(RecordingLink::default());
        let (mut dispatcher, events) = CommandDispatcher::new(QUIET);
        dispatcher.attach(Arc::clone(&link) as Arc<dyn SerialLink>);
        (dispatcher, events, link)
    }

    async fn settle() {
        tokio::time::sleep(QUIET * 5).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_on_one_joint_sends_only_last_angle() {
        // Arrange
        let (mut dispatcher, _events, link) = attached();

        // Act
        for angle in [10, 20, 30, 40, 55] {
            dispatcher.on_joint_changed(Joint::Gripper, angle);
        }
        settle().await;

        // Assert
        assert_eq!(link.frames(), vec!["J 0 55\n".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_interleaved_joints_debounce_independently() {
        // Arrange
        let (mut dispatcher, _events, link) = attached();

        // Act
        dispatcher.on_joint_changed(Joint::Wrist, 100);
        for angle in [1, 2, 3] {
            dispatcher.on_joint_changed(Joint::Gripper, angle);
        }
        settle().await;

        // Assert
        let mut frames = link.frames();
        frames.sort();
        assert_eq!(frames, vec!["J 0 3\n".to_string(), "J 1 100\n".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_on_one_joint_does_not_delay_another() {
        // Arrange
        let link = Arc::new(RecordingLink::default());
        let (mut dispatcher, _events) = CommandDispatcher::new(Duration::from_millis(60));
        dispatcher.attach(Arc::clone(&link) as Arc<dyn SerialLink>);

        // Act
        dispatcher.on_joint_changed(Joint::Wrist, 120);
        for step in 1..=6 {
            tokio::time::sleep(Duration::from_millis(25)).await;
            dispatcher.on_joint_changed(Joint::Gripper, step * 10);
        }
        let during_burst = link.frames();
        settle().await;

        // Assert
        assert_eq!(during_burst, vec!["J 1 120\n".to_string()]);
        assert_eq!(
            link.frames(),
            vec!["J 1 120\n".to_string(), "J 0 60\n".to_string()]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_on_joint_changed_clamps_angle() {
        let (mut dispatcher, _events, link) = attached();

        dispatcher.on_joint_changed(Joint::Base, 500);
        dispatcher.on_joint_changed(Joint::Elbow, -3);
        settle().await;

        let mut frames = link.frames();
        frames.sort();
        assert_eq!(frames, vec!["J 3 0\n".to_string(), "J 5 180\n".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_nothing_is_sent_before_quiet_period_elapses() {
        // Arrange
        let link = Arc::new(RecordingLink::default());
        let (mut dispatcher, _events) = CommandDispatcher::new(Duration::from_millis(300));
        dispatcher.attach(Arc::clone(&link) as Arc<dyn SerialLink>);

        // Act
        dispatcher.on_joint_changed(Joint::Base, 170);
        tokio::time::sleep(Duration::from_millis(299)).await;

        // Assert
        assert!(link.frames().is_empty());
        assert_eq!(dispatcher.pending_count(), 1);

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(link.frames(), vec!["J 5 170\n".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_now_bypasses_debounce() {
        let (mut dispatcher, _events, link) = attached();

        dispatcher.send_now(Joint::Twist, 45);
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(link.frames(), vec!["J 2 45\n".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_now_clamps_angle() {
        let (mut dispatcher, _events, link) = attached();

        dispatcher.send_now(Joint::Base, 999);
        dispatcher.send_now(Joint::Gripper, -5);
        settle().await;

        assert_eq!(link.frames(), vec!["J 5 180\n".to_string(), "J 0 0\n".to_string()]);
        assert_eq!(dispatcher.pose().angle(Joint::Base), Angle::clamped(180));
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_now_cancels_pending_debounced_send() {
        let (mut dispatcher, _events, link) = attached();

        dispatcher.on_joint_changed(Joint::Twist, 10);
        dispatcher.send_now(Joint::Twist, 45);
        settle().await;

        assert_eq!(link.frames(), vec!["J 2 45\n".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_all_writes_pose_in_index_order() {
        // Arrange
        let (mut dispatcher, _events, link) = attached();
        dispatcher.send_now(Joint::Shoulder, 120);
        settle().await;

        // Act
        dispatcher.send_all();
        settle().await;

        // Assert
        let frames = link.frames();
        assert_eq!(
            frames[1..],
            [
                "J 0 90\n", "J 1 90\n", "J 2 90\n", "J 3 90\n", "J 4 120\n", "J 5 90\n"
            ]
            .map(String::from)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_to_default_sends_home_pose() {
        let (mut dispatcher, _events, link) = attached();
        dispatcher.send_now(Joint::Base, 10);

        dispatcher.reset_to_default();
        settle().await;

        assert_eq!(dispatcher.pose(), ArmPose::home());
        assert_eq!(link.frames().len(), 1 + JOINT_COUNT);
        assert_eq!(link.frames().last().unwrap(), "J 5 90\n");
    }

    #[tokio::test(start_paused = true)]
    async fn test_detached_dispatcher_ignores_sends_but_tracks_pose() {
        // Arrange
        let (mut dispatcher, mut events) = CommandDispatcher::new(QUIET);

        // Act
        dispatcher.on_joint_changed(Joint::Elbow, 33);
        dispatcher.send_all();
        settle().await;

        // Assert
        assert_eq!(dispatcher.pose().angle(Joint::Elbow), Angle::clamped(33));
        assert_eq!(dispatcher.pending_count(), 0);
        assert!(events.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_detach_cancels_pending_sends() {
        // Arrange
        let (mut dispatcher, _events, link) = attached();
        for joint in Joint::ALL {
            dispatcher.on_joint_changed(joint, 10);
        }
        assert_eq!(dispatcher.pending_count(), JOINT_COUNT);

        // Act
        dispatcher.detach();
        settle().await;

        // Assert
        assert!(link.frames().is_empty());
        assert!(!dispatcher.is_attached());
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_failure_is_reported_as_event() {
        // Arrange
        let (mut dispatcher, mut events, link) = attached();
        link.fail_writes.store(true, Ordering::Relaxed);

        // Act
        dispatcher.send_now(Joint::Wrist, 60);
        let event = tokio::time::timeout(Duration::from_secs(1), events.recv())
            .await
            .expect("event in time")
            .expect("channel open");

        // Assert
        assert!(matches!(event, DispatchEvent::WriteFailed { .. }));
        assert!(event.log_entry().starts_with("TX error: write failed"));
        assert!(dispatcher.is_attached(), "write failure must not detach");
    }

    #[tokio::test(start_paused = true)]
    async fn test_successful_write_is_reported_with_tx_prefix() {
        let (mut dispatcher, mut events, _link) = attached();

        dispatcher.send_now(Joint::Gripper, 90);
        let event = tokio::time::timeout(Duration::from_secs(1), events.recv())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(event.log_entry(), "TX: J 0 90");
    }
}
