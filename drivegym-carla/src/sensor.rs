//! Bridges sensor callbacks to the synchronous step loop.
//!
//! Every camera gets its own [`FrameQueue`], a FIFO fed from the simulator's callback
//! context. The step loop ticks the world and then blocks on [`FrameQueue::pop`]. In
//! synchronous mode a camera produces at most one frame per tick, so the frame popped
//! right after a tick is the one of that tick.
//!
//! Collision and lane invasion events go to an [`EventHistory`] the same way and are
//! inspected once per step by the [`RewardEvaluator`](crate::RewardEvaluator).
use crate::{
    error::CarlaEnvError,
    sim::{ActorId, CameraImage, SensorCallback, SensorData, Simulator},
};
use anyhow::Result;
use crossbeam_channel::{unbounded, Receiver, Sender};
use log::debug;
use ndarray::{s, Array3, Axis};
use serde::{Deserialize, Serialize};
use std::{
    thread,
    time::{Duration, Instant},
};

/// Number of classes of the semantic segmentation camera taken into account.
pub const SEMANTIC_CLASSES: u8 = 13;

/// Channel of a semantic segmentation frame holding the class tag.
pub const SEMANTIC_LABEL_CHANNEL: usize = 2;

/// Classes kept in a decoded semantic frame, one output channel each.
///
/// These are the road and lane marking classes of the CARLA tag table.
pub const NAVIGATION_CLASSES: [u8; 3] = [2, 6, 7];

/// Type of the primary camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorType {
    Rgb,
    Semantic,
}

impl SensorType {
    pub fn blueprint_id(&self) -> &'static str {
        match self {
            Self::Rgb => "sensor.camera.rgb",
            Self::Semantic => "sensor.camera.semantic_segmentation",
        }
    }
}

/// Frames delivered by one camera, in delivery order.
pub struct FrameQueue {
    tx: Sender<CameraImage>,
    rx: Receiver<CameraImage>,
}

impl Default for FrameQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameQueue {
    pub fn new() -> Self {
        let (tx, rx) = unbounded();
        Self { tx, rx }
    }

    /// A callback pushing the images delivered to it onto this queue.
    pub fn callback(&self) -> SensorCallback {
        let tx = self.tx.clone();
        Box::new(move |data| {
            if let SensorData::Image(image) = data {
                // The receiver lives as long as the queue, a failed send means the
                // episode the queue belonged to is over.
                let _ = tx.send(image);
            }
        })
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    /// Blocks until a frame is available.
    ///
    /// Fails with [`CarlaEnvError::SensorTimeout`] after `timeout`.
    pub fn pop(&self, sensor: ActorId, timeout: Duration) -> Result<CameraImage> {
        self.rx.recv_timeout(timeout).map_err(|_| {
            CarlaEnvError::SensorTimeout {
                sensor,
                waited: timeout,
            }
            .into()
        })
    }

    /// Removes all queued frames and returns the newest one.
    pub fn drain_latest(&self) -> Option<CameraImage> {
        self.rx.try_iter().last()
    }

    /// Ticks the world until the queue holds a frame.
    ///
    /// Cameras need a few frames to warm up after being spawned; without waiting, the
    /// first observation of an episode would not exist yet.
    pub fn wait_for_frame<S: Simulator>(
        &self,
        sim: &mut S,
        sensor: ActorId,
        poll: Duration,
        timeout: Duration,
    ) -> Result<()> {
        let start = Instant::now();
        sim.tick()?;
        while self.is_empty() {
            if start.elapsed() > timeout {
                return Err(CarlaEnvError::SensorTimeout {
                    sensor,
                    waited: timeout,
                }
                .into());
            }
            debug!("waiting for camera {} to be ready", sensor);
            thread::sleep(poll);
            sim.tick()?;
        }
        Ok(())
    }
}

/// Append-only log of events of one kind, fed through a channel.
pub struct EventLog<T> {
    tx: Sender<T>,
    rx: Receiver<T>,
    entries: Vec<T>,
}

impl<T> Default for EventLog<T> {
    fn default() -> Self {
        let (tx, rx) = unbounded();
        Self {
            tx,
            rx,
            entries: Vec::new(),
        }
    }
}

impl<T> EventLog<T> {
    /// Sender for callbacks appending to this log.
    pub fn sink(&self) -> Sender<T> {
        self.tx.clone()
    }

    /// Moves delivered events into the log.
    pub fn collect(&mut self) {
        self.entries.extend(self.rx.try_iter());
    }

    /// Collected events, oldest first.
    pub fn entries(&self) -> &[T] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Discards collected events and events not collected yet.
    pub fn clear(&mut self) {
        self.rx.try_iter().for_each(drop);
        self.entries.clear();
    }
}

/// Collision and lane invasion events of an episode.
#[derive(Default)]
pub struct EventHistory {
    /// Magnitudes of collision impulses.
    pub collisions: EventLog<f64>,

    /// Labels of the lane marking types crossed at every invasion.
    pub lane_invasions: EventLog<Vec<String>>,
}

impl EventHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn collision_callback(&self) -> SensorCallback {
        let tx = self.collisions.sink();
        Box::new(move |data| {
            if let SensorData::Collision(event) = data {
                let _ = tx.send(event.intensity());
            }
        })
    }

    pub fn lane_invasion_callback(&self) -> SensorCallback {
        let tx = self.lane_invasions.sink();
        Box::new(move |data| {
            if let SensorData::LaneInvasion(event) = data {
                let _ = tx.send(event.labels());
            }
        })
    }

    /// Moves delivered events of both kinds into the history.
    pub fn collect(&mut self) {
        self.collisions.collect();
        self.lane_invasions.collect();
    }

    pub fn clear(&mut self) {
        self.collisions.clear();
        self.lane_invasions.clear();
    }
}

/// Converts a camera frame into an `(height, width, 3)` observation.
///
/// RGB frames keep their first three channels. Semantic frames are reduced to one
/// channel per class in [`NAVIGATION_CLASSES`], 255 where the pixel belongs to the
/// class and 0 elsewhere.
pub fn decode_frame(image: CameraImage, sensor_type: SensorType) -> Result<Array3<u8>> {
    let CameraImage {
        width,
        height,
        raw_data,
        ..
    } = image;
    let len = raw_data.len();
    let pixels = height * width;
    if pixels == 0 || len % pixels != 0 || len / pixels < 3 {
        return Err(CarlaEnvError::FrameShape { len, height, width }.into());
    }
    let frame = Array3::from_shape_vec((height, width, len / pixels), raw_data)?;

    let obs = match sensor_type {
        SensorType::Rgb => frame.slice(s![.., .., ..3]).to_owned(),
        SensorType::Semantic => {
            let labels = frame.index_axis(Axis(2), SEMANTIC_LABEL_CHANNEL);
            Array3::from_shape_fn((height, width, NAVIGATION_CLASSES.len()), |(i, j, k)| {
                let label = labels[[i, j]];
                if label < SEMANTIC_CLASSES && label == NAVIGATION_CLASSES[k] {
                    u8::MAX
                } else {
                    0
                }
            })
        }
    };

    Ok(obs)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::sim::{CollisionEvent, LaneInvasionEvent, LaneMarkingType, Vector3D};

    fn bgra(height: usize, width: usize, pixel: [u8; 4]) -> CameraImage {
        CameraImage {
            frame: 0,
            width,
            height,
            raw_data: pixel.iter().copied().cycle().take(height * width * 4).collect(),
        }
    }

    #[test]
    fn test_rgb_keeps_first_three_channels() {
        let obs = decode_frame(bgra(2, 3, [10, 20, 30, 255]), SensorType::Rgb).unwrap();
        assert_eq!(obs.shape(), &[2, 3, 3]);
        assert!(obs.outer_iter().all(|row| row
            .outer_iter()
            .all(|px| px.to_vec() == vec![10, 20, 30])));
    }

    #[test]
    fn test_semantic_one_hot() {
        // Road lines (6) go to the second output channel.
        let obs = decode_frame(bgra(2, 2, [0, 0, 6, 255]), SensorType::Semantic).unwrap();
        assert_eq!(obs.shape(), &[2, 2, 3]);
        assert!(obs.index_axis(Axis(2), 0).iter().all(|&v| v == 0));
        assert!(obs.index_axis(Axis(2), 1).iter().all(|&v| v == 255));
        assert!(obs.index_axis(Axis(2), 2).iter().all(|&v| v == 0));

        // Classes not kept and tags beyond the class count are blank.
        for tag in [1u8, 12, 13, 200] {
            let obs = decode_frame(bgra(1, 1, [0, 0, tag, 255]), SensorType::Semantic).unwrap();
            assert!(obs.iter().all(|&v| v == 0), "tag {}", tag);
        }
    }

    #[test]
    fn test_bad_frame_shape() {
        let image = CameraImage {
            frame: 0,
            width: 4,
            height: 4,
            raw_data: vec![0; 4 * 4 * 2],
        };
        let err = decode_frame(image, SensorType::Rgb).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CarlaEnvError>(),
            Some(CarlaEnvError::FrameShape { len: 32, .. })
        ));
    }

    #[test]
    fn test_frame_queue_is_fifo() {
        let queue = FrameQueue::new();
        let mut callback = queue.callback();
        for frame in 0..3 {
            let mut image = bgra(1, 1, [0; 4]);
            image.frame = frame;
            callback(SensorData::Image(image));
        }
        // Data of other sensors is ignored.
        callback(SensorData::LaneInvasion(LaneInvasionEvent {
            crossed_lane_markings: vec![],
        }));

        assert_eq!(queue.len(), 3);
        let timeout = Duration::from_millis(10);
        assert_eq!(queue.pop(ActorId(1), timeout).unwrap().frame, 0);
        assert_eq!(queue.drain_latest().unwrap().frame, 2);
        assert!(queue.is_empty());

        let err = queue.pop(ActorId(1), timeout).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CarlaEnvError>(),
            Some(CarlaEnvError::SensorTimeout { sensor: ActorId(1), .. })
        ));
    }

    #[test]
    fn test_frame_from_another_thread() {
        let queue = FrameQueue::new();
        let mut callback = queue.callback();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(5));
            callback(SensorData::Image(bgra(1, 1, [1, 2, 3, 4])));
        });
        let image = queue.pop(ActorId(7), Duration::from_secs(5)).unwrap();
        assert_eq!(image.raw_data, vec![1, 2, 3, 4]);
        handle.join().unwrap();
    }

    #[test]
    fn test_event_history() {
        let mut history = EventHistory::new();
        let mut on_collision = history.collision_callback();
        let mut on_lane = history.lane_invasion_callback();

        on_collision(SensorData::Collision(CollisionEvent {
            other_actor: "static.prop".to_string(),
            normal_impulse: Vector3D::new(3.0, 4.0, 0.0),
        }));
        on_lane(SensorData::LaneInvasion(LaneInvasionEvent {
            crossed_lane_markings: vec![LaneMarkingType::Solid, LaneMarkingType::Solid],
        }));

        assert!(history.collisions.is_empty());
        history.collect();
        assert_eq!(history.collisions.entries(), &[5.0]);
        assert_eq!(history.lane_invasions.entries(), &[vec!["Solid".to_string()]]);

        // Events not collected yet are dropped by clear() too.
        on_collision(SensorData::Collision(CollisionEvent {
            other_actor: "vehicle.audi.a2".to_string(),
            normal_impulse: Vector3D::default(),
        }));
        history.clear();
        history.collect();
        assert!(history.collisions.is_empty());
        assert!(history.lane_invasions.is_empty());
    }
}
