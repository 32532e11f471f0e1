pub mod branch;
pub mod proposal;

pub use branch::{BranchGraph, Divergence};
pub use proposal::{ChoiceTarget, NodeStub, ParentEdge, ProposedChoice, TopologyProposal};
