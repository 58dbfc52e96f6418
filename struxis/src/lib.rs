pub mod bar;
pub mod base_range;
pub mod big_move;
pub mod config;
pub mod confluence;
pub mod constant;
pub mod distributor;
pub mod engine;
pub mod error;
pub mod events;
pub mod fibonacci;
pub mod fractal;
pub mod id_generator;
pub mod indicator;
pub mod ingress;
pub mod logging;
pub mod receiver;
pub mod repository;
pub mod swing;
pub mod zone;
pub mod zone_state;

pub use bar::Bar;
pub use base_range::{BaseConfig, BaseCandleDetector, BaseRange};
pub use big_move::{BigMove, BigMoveDetector, MoveConfig};
pub use config::{AnalyzerConfig, AnalyzerProfile, ConfigPatch, FractalConfig};
pub use confluence::{ConfluenceConfig, ConfluenceResult, ConfluenceScore, ConfluenceScorer};
pub use constant::{
    Direction, DominantSide, FractalKind, TestKind, Timeframe, TransitionReason, ZoneKind,
    ZoneStatus,
};
pub use distributor::Distributor;
pub use engine::AnalyzerFacade;
pub use error::StructureError;
pub use events::{AnalysisDelta, StructureSnapshot};
pub use fibonacci::{FibonacciLevel, FibonacciProjector, FibonacciSet};
pub use fractal::{Fractal, FractalDetector};
pub use id_generator::IdGenerator;
pub use ingress::{IngressPushResult, OverloadPolicy, RingBuffer};
pub use logging::init_logging;
pub use receiver::{BarSource, CsvBarSource};
pub use repository::{HistoryQuery, InMemoryRepository, Repository, ZoneFilter, ZoneStatistics};
pub use swing::{Swing, SwingBuilder, SwingConfig, SwingDelta};
pub use zone::{SupplyDemandZone, ZoneConfig, ZoneDetector};
pub use zone_state::{
    StateConfig, ZoneRebirth, ZoneStateManager, ZoneStateResult, ZoneStateUpdate, ZoneTestEvent,
};
