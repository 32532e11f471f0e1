pub mod asset;
pub mod choice;
pub mod ids;
pub mod persona;
pub mod scene;

pub use asset::{location_key, AssetCatalog, AssetRef, BackgroundEntry, CatalogEntry, PoseRef};
pub use choice::{Edge, Precondition};
pub use ids::{slugify, EdgeId, NodeId, PersonaId};
pub use persona::{Appearance, Persona, PersonaRef, SpeechRegister, Voice};
pub use scene::{
    AffectionChange, DialogueLine, Node, NodeStatus, Rejection, RejectionKind, SceneContent, StateChange,
};
