/*
 * konvoy/api - the data model shared by every stage of a konvoy run: the
 * manifest as written by operators, the applications observed in the
 * cluster and the change sets computed between both.
 */

pub mod manifest;
pub use manifest::AppSpec;
pub use manifest::EnvMap;
pub use manifest::Manifest;
pub use manifest::Resources;

pub mod observed;
pub use observed::ObservedApp;

pub mod changeset;
pub use changeset::ChangeSet;
pub use changeset::ConfigChange;
pub use changeset::ConfigDelta;
pub use changeset::ImageRef;
pub use changeset::Transition;
