//! Kinematic tree of revolute joints and end effectors.
//!
//! The tree is stored as an arena of nodes addressed by stable ids, with
//! left-child / right-sibling links between them. This keeps parent and
//! child references cycle free and lets both the numbering pass and the
//! forward kinematics pass run iteratively over an explicit stack.

use nalgebra::{Unit, UnitQuaternion, Vector3};

use crate::arm_node::{ArmNode, Purpose};

/// Stable identifier of a node within the tree arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub u32);

impl NodeId {
    fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone)]
struct Links {
    left_child: Option<NodeId>,
    right_sibling: Option<NodeId>,
    /// The node this one was linked from, either as its left child or as
    /// its right sibling.
    attached_to: Option<NodeId>,
    is_left_child: bool,
}

/// Left-child / right-sibling kinematic tree. The node set is fixed once
/// [`KinematicTree::init`] has assigned sequence numbers; afterwards only
/// joint angles change and [`KinematicTree::compute`] refreshes the world
/// state of every node.
pub struct KinematicTree {
    nodes: Vec<ArmNode>,
    links: Vec<Links>,
    root: Option<NodeId>,
    joint_count: usize,
    effector_count: usize,
}

impl KinematicTree {
    pub fn new() -> Self {
        KinematicTree {
            nodes: Vec::new(),
            links: Vec::new(),
            root: None,
            joint_count: 0,
            effector_count: 0,
        }
    }

    fn push_node(&mut self, node: ArmNode) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(node);
        self.links.push(Links {
            left_child: None,
            right_sibling: None,
            attached_to: None,
            is_left_child: false,
        });
        id
    }

    /// Inserts the root node. Any previously set root is replaced only in
    /// an empty tree; calling this twice is a construction error and the
    /// second root becomes an orphan that no traversal will reach.
    pub fn insert_root(&mut self, node: ArmNode) -> NodeId {
        let id = self.push_node(node);
        if self.root.is_none() {
            self.root = Some(id);
        }
        id
    }

    /// Attaches `node` as a child of `parent`. If the parent already has a
    /// left child, the node is appended at the end of the existing sibling
    /// chain, which keeps the left-child / right-sibling shape intact.
    pub fn insert_left_child(&mut self, parent: NodeId, node: ArmNode) -> NodeId {
        match self.links[parent.index()].left_child {
            None => {
                let id = self.push_node(node);
                self.links[parent.index()].left_child = Some(id);
                self.links[id.index()].attached_to = Some(parent);
                self.links[id.index()].is_left_child = true;
                id
            }
            Some(first_child) => self.insert_right_sibling(first_child, node),
        }
    }

    /// Attaches `node` at the end of the sibling chain starting at
    /// `sibling`.
    pub fn insert_right_sibling(&mut self, sibling: NodeId, node: ArmNode) -> NodeId {
        let mut last = sibling;
        while let Some(next) = self.links[last.index()].right_sibling {
            last = next;
        }
        let id = self.push_node(node);
        self.links[last.index()].right_sibling = Some(id);
        self.links[id.index()].attached_to = Some(last);
        self.links[id.index()].is_left_child = false;
        id
    }

    /// Structural parent of the node: walks right-sibling links back until
    /// the left-child edge, then up. The root has no parent.
    pub fn parent_of(&self, id: NodeId) -> Option<NodeId> {
        let mut current = id;
        loop {
            let link = &self.links[current.index()];
            match link.attached_to {
                None => return None,
                Some(up) if link.is_left_child => return Some(up),
                Some(up) => current = up,
            }
        }
    }

    /// Returns true when `ancestor` lies on the parent chain of `node`.
    pub fn is_ancestor(&self, ancestor: NodeId, node: NodeId) -> bool {
        let mut current = self.parent_of(node);
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            current = self.parent_of(id);
        }
        false
    }

    /// Assigns sequence numbers to joints and effectors in pre-order, each
    /// kind counted separately. Must run once after all insertions; the
    /// node set is fixed from this point on.
    pub fn init(&mut self) {
        let mut joints = 0;
        let mut effectors = 0;
        let Some(root) = self.root else {
            return;
        };
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            // Sibling below the child on the stack so the child pops first,
            // giving pre-order: node, left subtree, right sibling.
            if let Some(sibling) = self.links[id.index()].right_sibling {
                stack.push(sibling);
            }
            if let Some(child) = self.links[id.index()].left_child {
                stack.push(child);
            }
            let node = &mut self.nodes[id.index()];
            match node.purpose {
                Purpose::Joint => {
                    node.joint_index = Some(joints);
                    joints += 1;
                }
                Purpose::Effector => {
                    node.effector_index = Some(effectors);
                    effectors += 1;
                }
            }
        }
        self.joint_count = joints;
        self.effector_count = effectors;
    }

    /// Forward kinematics pass. For every node, rotates the local
    /// attachment by the accumulated ancestor rotation (Rodrigues rotations
    /// about each ancestor axis by its angle, composed root to node) to
    /// obtain `relative_position`, then chains positions from the root and
    /// carries the rotation axis into world space.
    pub fn compute(&mut self) {
        let Some(root) = self.root else {
            return;
        };
        let mut stack: Vec<(NodeId, Vector3<f64>, UnitQuaternion<f64>)> =
            vec![(root, Vector3::zeros(), UnitQuaternion::identity())];
        while let Some((id, parent_position, parent_rotation)) = stack.pop() {
            if let Some(sibling) = self.links[id.index()].right_sibling {
                // Siblings hang off the same parent and share its frame.
                stack.push((sibling, parent_position, parent_rotation));
            }
            let node = &mut self.nodes[id.index()];
            let relative = parent_rotation * node.attach;
            node.relative_position = relative;
            node.position = parent_position + relative;
            node.world_axis = parent_rotation * node.axis;
            let rotation = match Unit::try_new(node.axis, 1e-12) {
                Some(axis) if node.is_joint() => {
                    parent_rotation * UnitQuaternion::from_axis_angle(&axis, node.theta())
                }
                _ => parent_rotation,
            };
            let position = node.position;
            if let Some(child) = self.links[id.index()].left_child {
                stack.push((child, position, rotation));
            }
        }
    }

    pub fn node(&self, id: NodeId) -> &ArmNode {
        &self.nodes[id.index()]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut ArmNode {
        &mut self.nodes[id.index()]
    }

    /// All nodes in insertion order.
    pub fn nodes(&self) -> &[ArmNode] {
        &self.nodes
    }

    pub fn nodes_mut(&mut self) -> &mut [ArmNode] {
        &mut self.nodes
    }

    /// Node ids in insertion order.
    pub fn ids(&self) -> impl Iterator<Item = NodeId> {
        (0..self.nodes.len() as u32).map(NodeId)
    }

    /// World positions of all nodes in insertion order.
    pub fn positions(&self) -> Vec<Vector3<f64>> {
        self.nodes.iter().map(|n| n.position).collect()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn joint_count(&self) -> usize {
        self.joint_count
    }

    pub fn effector_count(&self) -> usize {
        self.effector_count
    }

    /// Id of the joint holding the given joint sequence number.
    pub fn joint_id(&self, joint_index: usize) -> Option<NodeId> {
        self.ids()
            .find(|id| self.node(*id).joint_index == Some(joint_index))
    }

    /// Id of the effector holding the given effector sequence number.
    pub fn effector_id(&self, effector_index: usize) -> Option<NodeId> {
        self.ids()
            .find(|id| self.node(*id).effector_index == Some(effector_index))
    }
}
