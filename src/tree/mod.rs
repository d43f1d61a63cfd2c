//! Arena-based mutable document tree.
//!
//! This is the engine layer the DOM wrappers sit on: typed indices into
//! slot arenas, sibling/child link maintenance, subtree copy and free,
//! and ancestor-chain namespace search. All navigation links are arena
//! indices rather than pointers, so a tree can be mutated, grafted into,
//! and bulk-dropped without reference cycles.
//!
//! Slots are recycled through free lists. A freed slot is vacated, so a
//! stale index reads as "no node" instead of aliasing whatever was
//! allocated next. Freeing a subtree releases every node slot it contains
//! and every namespace definition declared inside it, exactly once.

pub mod serialize;
pub mod strings;

use std::collections::HashMap;
use std::num::NonZeroU32;
use std::rc::Rc;

use strings::StringCache;

/// Typed index of a node slot. `Option<NodeId>` is pointer-sized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct NodeId(NonZeroU32);

impl NodeId {
    fn from_index(index: usize) -> Self {
        NodeId(NonZeroU32::new(index as u32).expect("node index must be non-zero"))
    }

    fn as_index(self) -> usize {
        self.0.get() as usize
    }
}

/// Typed index of a namespace-definition slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct NsId(NonZeroU32);

impl NsId {
    fn from_index(index: usize) -> Self {
        NsId(NonZeroU32::new(index as u32).expect("ns index must be non-zero"))
    }

    fn as_index(self) -> usize {
        self.0.get() as usize
    }
}

/// A prefix -> URI declaration owned by some element.
///
/// `prefix == None` is the default namespace.
#[derive(Debug, Clone)]
pub struct NsDef {
    pub prefix: Option<Rc<str>>,
    pub uri: Rc<str>,
}

/// Node payload by kind.
///
/// Navigation links live in [`NodeData`]; this enum carries only the
/// kind-specific data. An element's `ns` is the single binding applied to
/// its own name, distinct from `ns_defs`, the declarations it carries for
/// its subtree.
#[derive(Debug, Clone)]
pub enum Payload {
    Document {
        version: Option<String>,
        encoding: Option<String>,
    },
    Element {
        name: Rc<str>,
        ns: Option<NsId>,
        ns_defs: Vec<NsId>,
        first_attr: Option<NodeId>,
    },
    Attribute {
        name: Rc<str>,
        ns: Option<NsId>,
        value: String,
    },
    Text {
        content: String,
    },
    Comment {
        content: String,
    },
    Pi {
        target: Rc<str>,
        data: Option<String>,
    },
    DocType {
        name: String,
    },
}

/// One node slot: payload plus tree links.
///
/// Attributes hang off their element through `Payload::Element::first_attr`
/// and chain among themselves via `next_sibling`/`prev_sibling`; they are
/// not part of the child list.
#[derive(Debug, Clone)]
pub struct NodeData {
    pub payload: Payload,
    pub parent: Option<NodeId>,
    pub first_child: Option<NodeId>,
    pub last_child: Option<NodeId>,
    pub prev_sibling: Option<NodeId>,
    pub next_sibling: Option<NodeId>,
}

impl NodeData {
    fn new(payload: Payload) -> Self {
        NodeData {
            payload,
            parent: None,
            first_child: None,
            last_child: None,
            prev_sibling: None,
            next_sibling: None,
        }
    }
}

/// The arena tree.
///
/// A tree either backs a document (in which case `doc_root` points at its
/// document node) or holds a standalone subtree built apart from any
/// document. Index 0 of both arenas is a permanent placeholder so the
/// non-zero ids start at 1.
#[derive(Debug)]
pub struct Tree {
    nodes: Vec<Option<NodeData>>,
    free_nodes: Vec<u32>,
    ns: Vec<Option<NsDef>>,
    free_ns: Vec<u32>,
    doc_root: Option<NodeId>,
    pub strings: StringCache,
}

impl Tree {
    pub fn new() -> Self {
        Tree {
            nodes: vec![None],
            free_nodes: Vec::new(),
            ns: vec![None],
            free_ns: Vec::new(),
            doc_root: None,
            strings: StringCache::new(),
        }
    }

    /// Create a tree containing a single document node.
    pub fn new_document() -> (Self, NodeId) {
        let mut tree = Tree::new();
        let doc = tree.create_node(Payload::Document {
            version: None,
            encoding: None,
        });
        tree.doc_root = Some(doc);
        (tree, doc)
    }

    // --- Slot management ---

    pub fn create_node(&mut self, payload: Payload) -> NodeId {
        if let Some(index) = self.free_nodes.pop() {
            self.nodes[index as usize] = Some(NodeData::new(payload));
            NodeId(NonZeroU32::new(index).expect("free list never holds index 0"))
        } else {
            let index = self.nodes.len();
            self.nodes.push(Some(NodeData::new(payload)));
            NodeId::from_index(index)
        }
    }

    pub fn create_ns(&mut self, prefix: Option<&str>, uri: &str) -> NsId {
        let def = NsDef {
            prefix: prefix.map(|p| self.strings.intern(p)),
            uri: self.strings.intern(uri),
        };
        if let Some(index) = self.free_ns.pop() {
            self.ns[index as usize] = Some(def);
            NsId(NonZeroU32::new(index).expect("free list never holds index 0"))
        } else {
            let index = self.ns.len();
            self.ns.push(Some(def));
            NsId::from_index(index)
        }
    }

    /// Non-panicking node access; `None` for vacated or out-of-range slots.
    pub fn get(&self, id: NodeId) -> Option<&NodeData> {
        self.nodes.get(id.as_index()).and_then(|slot| slot.as_ref())
    }

    /// Node access for ids known to be live.
    ///
    /// # Panics
    ///
    /// Panics if the slot has been freed.
    pub fn node(&self, id: NodeId) -> &NodeData {
        self.get(id).expect("node slot is vacant")
    }

    fn node_mut(&mut self, id: NodeId) -> &mut NodeData {
        self.nodes[id.as_index()]
            .as_mut()
            .expect("node slot is vacant")
    }

    pub fn ns_def(&self, id: NsId) -> Option<&NsDef> {
        self.ns.get(id.as_index()).and_then(|slot| slot.as_ref())
    }

    pub fn set_ns_uri(&mut self, id: NsId, uri: &str) {
        let interned = self.strings.intern(uri);
        if let Some(def) = self.ns.get_mut(id.as_index()).and_then(|s| s.as_mut()) {
            def.uri = interned;
        }
    }

    pub fn free_ns(&mut self, id: NsId) {
        if let Some(slot) = self.ns.get_mut(id.as_index()) {
            if slot.take().is_some() {
                self.free_ns.push(id.0.get());
            }
        }
    }

    pub fn doc_root(&self) -> Option<NodeId> {
        self.doc_root
    }

    pub fn set_doc_version(&mut self, value: Option<String>) {
        if let Some(doc) = self.doc_root {
            if let Payload::Document { version, .. } = &mut self.node_mut(doc).payload {
                *version = value;
            }
        }
    }

    pub fn set_doc_encoding(&mut self, value: Option<String>) {
        if let Some(doc) = self.doc_root {
            if let Payload::Document { encoding, .. } = &mut self.node_mut(doc).payload {
                *encoding = value;
            }
        }
    }

    pub fn set_doc_root(&mut self, root: Option<NodeId>) {
        self.doc_root = root;
    }

    // --- Payload accessors ---

    /// Raw node name: element/attribute name (possibly still carrying a
    /// dangling prefix or URI encoding), PI target, or DOCTYPE name.
    pub fn name(&self, id: NodeId) -> Option<&str> {
        match &self.get(id)?.payload {
            Payload::Element { name, .. } | Payload::Attribute { name, .. } => Some(name),
            Payload::Pi { target, .. } => Some(target),
            Payload::DocType { name } => Some(name),
            _ => None,
        }
    }

    pub fn node_ns(&self, id: NodeId) -> Option<NsId> {
        match &self.get(id)?.payload {
            Payload::Element { ns, .. } | Payload::Attribute { ns, .. } => *ns,
            _ => None,
        }
    }

    pub fn node_ns_uri(&self, id: NodeId) -> Option<&str> {
        let ns = self.node_ns(id)?;
        self.ns_def(ns).map(|def| &*def.uri)
    }

    pub fn ns_defs_of(&self, id: NodeId) -> Vec<NsId> {
        match self.get(id).map(|n| &n.payload) {
            Some(Payload::Element { ns_defs, .. }) => ns_defs.clone(),
            _ => Vec::new(),
        }
    }

    pub fn set_node_ns(&mut self, id: NodeId, ns: Option<NsId>) {
        match &mut self.node_mut(id).payload {
            Payload::Element { ns: slot, .. } | Payload::Attribute { ns: slot, .. } => *slot = ns,
            _ => {}
        }
    }

    pub fn set_node_name(&mut self, id: NodeId, name: &str) {
        let interned = self.strings.intern(name);
        match &mut self.node_mut(id).payload {
            Payload::Element { name: slot, .. } | Payload::Attribute { name: slot, .. } => {
                *slot = interned;
            }
            _ => {}
        }
    }

    pub fn add_ns_def(&mut self, elem: NodeId, def: NsId) {
        if let Payload::Element { ns_defs, .. } = &mut self.node_mut(elem).payload {
            ns_defs.push(def);
        }
    }

    /// Drop `def` from the element's declaration list and vacate its slot.
    pub fn remove_ns_def(&mut self, elem: NodeId, def: NsId) {
        if let Payload::Element { ns_defs, .. } = &mut self.node_mut(elem).payload {
            ns_defs.retain(|&d| d != def);
        }
        self.free_ns(def);
    }

    // --- Navigation ---

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.get(id)?.parent
    }

    pub fn first_child(&self, id: NodeId) -> Option<NodeId> {
        self.get(id)?.first_child
    }

    pub fn next_sibling(&self, id: NodeId) -> Option<NodeId> {
        self.get(id)?.next_sibling
    }

    pub fn children_vec(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut cur = self.get(id).and_then(|n| n.first_child);
        while let Some(c) = cur {
            out.push(c);
            cur = self.get(c).and_then(|n| n.next_sibling);
        }
        out
    }

    pub fn attrs_vec(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut cur = match self.get(id).map(|n| &n.payload) {
            Some(Payload::Element { first_attr, .. }) => *first_attr,
            _ => None,
        };
        while let Some(a) = cur {
            out.push(a);
            cur = self.get(a).and_then(|n| n.next_sibling);
        }
        out
    }

    /// Topmost ancestor of `id` (the node itself when detached).
    pub fn subtree_root(&self, id: NodeId) -> NodeId {
        let mut cur = id;
        while let Some(p) = self.parent(cur) {
            cur = p;
        }
        cur
    }

    pub fn is_element(&self, id: NodeId) -> bool {
        matches!(
            self.get(id).map(|n| &n.payload),
            Some(Payload::Element { .. })
        )
    }

    pub fn is_attribute(&self, id: NodeId) -> bool {
        matches!(
            self.get(id).map(|n| &n.payload),
            Some(Payload::Attribute { .. })
        )
    }

    // --- Linking ---

    /// Append `child` as the last child of `parent`.
    ///
    /// Fails (tree unchanged) when the parent cannot hold children, the
    /// child is an attribute or already linked, or the link would create a
    /// cycle.
    pub fn link_child(&mut self, parent: NodeId, child: NodeId) -> bool {
        if self.get(parent).is_none() || self.get(child).is_none() {
            return false;
        }
        match self.node(parent).payload {
            Payload::Element { .. } | Payload::Document { .. } => {}
            _ => return false,
        }
        if matches!(self.node(child).payload, Payload::Attribute { .. }) {
            return false;
        }
        if self.node(child).parent.is_some() {
            return false;
        }
        // reject linking a node under its own descendant
        let mut cur = Some(parent);
        while let Some(id) = cur {
            if id == child {
                return false;
            }
            cur = self.parent(id);
        }

        self.node_mut(child).parent = Some(parent);
        if let Some(last) = self.node(parent).last_child {
            self.node_mut(last).next_sibling = Some(child);
            self.node_mut(child).prev_sibling = Some(last);
        } else {
            self.node_mut(parent).first_child = Some(child);
        }
        self.node_mut(parent).last_child = Some(child);
        true
    }

    /// Append `attr` to the element's attribute chain.
    pub fn link_attr(&mut self, elem: NodeId, attr: NodeId) -> bool {
        if self.get(elem).is_none() || self.get(attr).is_none() {
            return false;
        }
        if !self.is_element(elem) || !self.is_attribute(attr) {
            return false;
        }
        if self.node(attr).parent.is_some() {
            return false;
        }

        let last = self.attrs_vec(elem).last().copied();
        self.node_mut(attr).parent = Some(elem);
        match last {
            Some(prev) => {
                self.node_mut(prev).next_sibling = Some(attr);
                self.node_mut(attr).prev_sibling = Some(prev);
            }
            None => {
                if let Payload::Element { first_attr, .. } = &mut self.node_mut(elem).payload {
                    *first_attr = Some(attr);
                }
            }
        }
        true
    }

    /// Detach a node from its parent, whichever chain it sits in.
    ///
    /// The node and its subtree stay allocated.
    pub fn unlink(&mut self, id: NodeId) {
        let Some(node) = self.get(id) else { return };
        let Some(parent) = node.parent else { return };
        let prev = node.prev_sibling;
        let next = node.next_sibling;
        let in_attr_chain = matches!(node.payload, Payload::Attribute { .. });

        match prev {
            Some(p) => self.node_mut(p).next_sibling = next,
            None => {
                if in_attr_chain {
                    if let Payload::Element { first_attr, .. } = &mut self.node_mut(parent).payload
                    {
                        *first_attr = next;
                    }
                } else {
                    self.node_mut(parent).first_child = next;
                }
            }
        }
        match next {
            Some(n) => self.node_mut(n).prev_sibling = prev,
            None => {
                if !in_attr_chain {
                    self.node_mut(parent).last_child = prev;
                }
            }
        }

        let node = self.node_mut(id);
        node.parent = None;
        node.prev_sibling = None;
        node.next_sibling = None;
    }

    /// Vacate every slot of an (unlinked) subtree: descendants, attributes,
    /// and the namespace definitions its elements declared. Safe to call on
    /// an already-freed id; each slot is released at most once.
    pub fn free_subtree(&mut self, id: NodeId) {
        if self.get(id).is_none() {
            return;
        }
        let defs = self.ns_defs_of(id);
        for attr in self.attrs_vec(id) {
            self.free_subtree(attr);
        }
        for child in self.children_vec(id) {
            self.free_subtree(child);
        }
        for def in defs {
            self.free_ns(def);
        }
        if let Some(slot) = self.nodes.get_mut(id.as_index()) {
            if slot.take().is_some() {
                self.free_nodes.push(id.0.get());
            }
        }
    }

    // --- Namespace search ---

    /// Walk `start` and its ancestors for a declaration of `prefix`
    /// (`None` = the default namespace).
    pub fn search_ns_by_prefix(&self, start: NodeId, prefix: Option<&str>) -> Option<NsId> {
        let mut cur = Some(start);
        while let Some(id) = cur {
            for def_id in self.ns_defs_of(id) {
                if let Some(def) = self.ns_def(def_id) {
                    if def.prefix.as_deref() == prefix {
                        return Some(def_id);
                    }
                }
            }
            cur = self.parent(id);
        }
        None
    }

    /// Walk `start` and its ancestors for the nearest declaration of `uri`.
    pub fn search_ns_by_uri(&self, start: NodeId, uri: &str) -> Option<NsId> {
        let mut cur = Some(start);
        while let Some(id) = cur {
            for def_id in self.ns_defs_of(id) {
                if let Some(def) = self.ns_def(def_id) {
                    if &*def.uri == uri {
                        return Some(def_id);
                    }
                }
            }
            cur = self.parent(id);
        }
        None
    }

    // --- Values ---

    /// Node content in the engine's sense: concatenated descendant text for
    /// elements, the value for attributes, the content/data otherwise.
    pub fn string_value(&self, id: NodeId) -> String {
        match self.get(id).map(|n| &n.payload) {
            Some(Payload::Attribute { value, .. }) => value.clone(),
            Some(Payload::Text { content }) | Some(Payload::Comment { content }) => {
                content.clone()
            }
            Some(Payload::Pi { data, .. }) => data.clone().unwrap_or_default(),
            Some(Payload::Element { .. }) | Some(Payload::Document { .. }) => {
                let mut out = String::new();
                self.collect_text(id, &mut out);
                out
            }
            _ => String::new(),
        }
    }

    fn collect_text(&self, id: NodeId, out: &mut String) {
        for child in self.children_vec(id) {
            match self.get(child).map(|n| &n.payload) {
                Some(Payload::Text { content }) => out.push_str(content),
                Some(Payload::Element { .. }) => self.collect_text(child, out),
                _ => {}
            }
        }
    }

    /// Replace a node's content. For elements this frees every existing
    /// child and installs a single text node.
    pub fn set_string_value(&mut self, id: NodeId, value: &str) {
        let is_element = self.is_element(id);
        if is_element {
            for child in self.children_vec(id) {
                self.unlink(child);
                self.free_subtree(child);
            }
            let text = self.create_node(Payload::Text {
                content: value.to_string(),
            });
            self.link_child(id, text);
            return;
        }
        match &mut self.node_mut(id).payload {
            Payload::Attribute { value: slot, .. } => *slot = value.to_string(),
            Payload::Text { content } | Payload::Comment { content } => {
                *content = value.to_string();
            }
            Payload::Pi { data, .. } => *data = Some(value.to_string()),
            _ => {}
        }
    }

    // --- Subtree copy ---

    /// Deep-copy a subtree out of this tree into a detached description.
    ///
    /// Bindings to definitions declared inside the subtree are kept by
    /// ordinal; bindings to ancestor-owned definitions are recorded as
    /// foreign prefix/URI pairs, to be materialized as fresh definitions on
    /// the copied root. That re-declaration is exactly the duplication the
    /// reconciler's collapse pass later folds into the target tree.
    pub fn extract(&self, id: NodeId) -> Option<Subtree> {
        self.get(id)?;
        let mut def_map: HashMap<NsId, usize> = HashMap::new();
        let mut defs: Vec<(Option<String>, String)> = Vec::new();
        self.collect_defs(id, &mut def_map, &mut defs);

        let mut foreign: Vec<(Option<String>, String)> = Vec::new();
        let root = self.extract_node(id, &def_map, &mut foreign);
        Some(Subtree {
            defs,
            foreign,
            root,
        })
    }

    fn collect_defs(
        &self,
        id: NodeId,
        def_map: &mut HashMap<NsId, usize>,
        defs: &mut Vec<(Option<String>, String)>,
    ) {
        for def_id in self.ns_defs_of(id) {
            if let Some(def) = self.ns_def(def_id) {
                let ord = defs.len();
                defs.push((
                    def.prefix.as_deref().map(str::to_string),
                    def.uri.to_string(),
                ));
                def_map.insert(def_id, ord);
            }
        }
        for child in self.children_vec(id) {
            self.collect_defs(child, def_map, defs);
        }
    }

    fn extract_ns(
        &self,
        ns: Option<NsId>,
        def_map: &HashMap<NsId, usize>,
        foreign: &mut Vec<(Option<String>, String)>,
    ) -> CopiedNs {
        let Some(ns_id) = ns else {
            return CopiedNs::None;
        };
        if let Some(&ord) = def_map.get(&ns_id) {
            return CopiedNs::Local(ord);
        }
        let Some(def) = self.ns_def(ns_id) else {
            return CopiedNs::None;
        };
        let key = (
            def.prefix.as_deref().map(str::to_string),
            def.uri.to_string(),
        );
        let ord = match foreign.iter().position(|f| *f == key) {
            Some(ord) => ord,
            None => {
                foreign.push(key);
                foreign.len() - 1
            }
        };
        CopiedNs::Foreign(ord)
    }

    fn extract_node(
        &self,
        id: NodeId,
        def_map: &HashMap<NsId, usize>,
        foreign: &mut Vec<(Option<String>, String)>,
    ) -> CopiedNode {
        let payload = match &self.node(id).payload {
            Payload::Element { name, ns, .. } => CopiedPayload::Element {
                name: name.to_string(),
                ns: self.extract_ns(*ns, def_map, foreign),
            },
            Payload::Attribute { name, ns, value } => CopiedPayload::Attribute {
                name: name.to_string(),
                ns: self.extract_ns(*ns, def_map, foreign),
                value: value.clone(),
            },
            Payload::Text { content } => CopiedPayload::Text(content.clone()),
            Payload::Comment { content } => CopiedPayload::Comment(content.clone()),
            Payload::Pi { target, data } => CopiedPayload::Pi {
                target: target.to_string(),
                data: data.clone(),
            },
            Payload::DocType { name } => CopiedPayload::DocType { name: name.clone() },
            Payload::Document { .. } => CopiedPayload::Document,
        };

        let def_ords = self
            .ns_defs_of(id)
            .iter()
            .filter_map(|d| def_map.get(d).copied())
            .collect();
        let attrs = self
            .attrs_vec(id)
            .into_iter()
            .map(|a| self.extract_node(a, def_map, foreign))
            .collect();
        let children = self
            .children_vec(id)
            .into_iter()
            .map(|c| self.extract_node(c, def_map, foreign))
            .collect();

        CopiedNode {
            payload,
            def_ords,
            attrs,
            children,
        }
    }

    /// Materialize an extracted subtree into this tree, returning the new
    /// (unlinked) root. Foreign bindings become fresh declarations on the
    /// new root element; when the root cannot carry declarations the
    /// binding is stashed as a `{URI}:local` dangling name instead.
    pub fn implant(&mut self, sub: &Subtree) -> NodeId {
        let local_ids: Vec<NsId> = sub
            .defs
            .iter()
            .map(|(prefix, uri)| self.create_ns(prefix.as_deref(), uri))
            .collect();

        let root_is_element = matches!(sub.root.payload, CopiedPayload::Element { .. });
        let foreign_ids: Vec<NsId> = if root_is_element {
            sub.foreign
                .iter()
                .map(|(prefix, uri)| self.create_ns(prefix.as_deref(), uri))
                .collect()
        } else {
            Vec::new()
        };

        let root = self.implant_node(&sub.root, sub, &local_ids, &foreign_ids);
        if root_is_element {
            for &id in &foreign_ids {
                self.add_ns_def(root, id);
            }
        }
        root
    }

    fn implant_ns(
        &mut self,
        ns: &CopiedNs,
        sub: &Subtree,
        local_ids: &[NsId],
        foreign_ids: &[NsId],
        name: &str,
    ) -> (Option<NsId>, Option<String>) {
        match ns {
            CopiedNs::None => (None, None),
            CopiedNs::Local(ord) => (Some(local_ids[*ord]), None),
            CopiedNs::Foreign(ord) => {
                if let Some(&id) = foreign_ids.get(*ord) {
                    (Some(id), None)
                } else {
                    // no element to carry the declaration; fall back to the
                    // dangling URI encoding and let reconciliation resolve it
                    let uri = &sub.foreign[*ord].1;
                    let local = name.rsplit(':').next().unwrap_or(name);
                    (None, Some(format!("{{{uri}}}:{local}")))
                }
            }
        }
    }

    fn implant_node(
        &mut self,
        node: &CopiedNode,
        sub: &Subtree,
        local_ids: &[NsId],
        foreign_ids: &[NsId],
    ) -> NodeId {
        let id = match &node.payload {
            CopiedPayload::Element { name, ns } => {
                let (ns, fallback) = self.implant_ns(ns, sub, local_ids, foreign_ids, name);
                let name = self.strings.intern(fallback.as_deref().unwrap_or(name));
                self.create_node(Payload::Element {
                    name,
                    ns,
                    ns_defs: node.def_ords.iter().map(|&o| local_ids[o]).collect(),
                    first_attr: None,
                })
            }
            CopiedPayload::Attribute { name, ns, value } => {
                let (ns, fallback) = self.implant_ns(ns, sub, local_ids, foreign_ids, name);
                let name = self.strings.intern(fallback.as_deref().unwrap_or(name));
                self.create_node(Payload::Attribute {
                    name,
                    ns,
                    value: value.clone(),
                })
            }
            CopiedPayload::Text(content) => self.create_node(Payload::Text {
                content: content.clone(),
            }),
            CopiedPayload::Comment(content) => self.create_node(Payload::Comment {
                content: content.clone(),
            }),
            CopiedPayload::Pi { target, data } => {
                let target = self.strings.intern(target);
                self.create_node(Payload::Pi {
                    target,
                    data: data.clone(),
                })
            }
            CopiedPayload::DocType { name } => {
                self.create_node(Payload::DocType { name: name.clone() })
            }
            CopiedPayload::Document => self.create_node(Payload::Document {
                version: None,
                encoding: None,
            }),
        };

        for attr in &node.attrs {
            let attr_id = self.implant_node(attr, sub, local_ids, foreign_ids);
            self.link_attr(id, attr_id);
        }
        for child in &node.children {
            let child_id = self.implant_node(child, sub, local_ids, foreign_ids);
            self.link_child(id, child_id);
        }
        id
    }

    /// Deep-copy a subtree within this tree; the copy is unlinked.
    pub fn copy_subtree(&mut self, id: NodeId) -> Option<NodeId> {
        let sub = self.extract(id)?;
        Some(self.implant(&sub))
    }
}

impl Default for Tree {
    fn default() -> Self {
        Tree::new()
    }
}

/// A detached, fully owned copy of a subtree, ready to implant.
#[derive(Debug)]
pub struct Subtree {
    defs: Vec<(Option<String>, String)>,
    foreign: Vec<(Option<String>, String)>,
    root: CopiedNode,
}

#[derive(Debug)]
struct CopiedNode {
    payload: CopiedPayload,
    def_ords: Vec<usize>,
    attrs: Vec<CopiedNode>,
    children: Vec<CopiedNode>,
}

#[derive(Debug)]
enum CopiedPayload {
    Document,
    Element { name: String, ns: CopiedNs },
    Attribute { name: String, ns: CopiedNs, value: String },
    Text(String),
    Comment(String),
    Pi { target: String, data: Option<String> },
    DocType { name: String },
}

#[derive(Debug)]
enum CopiedNs {
    None,
    Local(usize),
    Foreign(usize),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn element(tree: &mut Tree, name: &str) -> NodeId {
        let name = tree.strings.intern(name);
        tree.create_node(Payload::Element {
            name,
            ns: None,
            ns_defs: Vec::new(),
            first_attr: None,
        })
    }

    fn text(tree: &mut Tree, content: &str) -> NodeId {
        tree.create_node(Payload::Text {
            content: content.to_string(),
        })
    }

    #[test]
    fn test_link_and_children() {
        let mut tree = Tree::new();
        let root = element(&mut tree, "root");
        let a = element(&mut tree, "a");
        let b = element(&mut tree, "b");
        assert!(tree.link_child(root, a));
        assert!(tree.link_child(root, b));
        assert_eq!(tree.children_vec(root), vec![a, b]);
        assert_eq!(tree.parent(a), Some(root));
    }

    #[test]
    fn test_link_rejects_cycle() {
        let mut tree = Tree::new();
        let root = element(&mut tree, "root");
        let child = element(&mut tree, "child");
        assert!(tree.link_child(root, child));
        assert!(!tree.link_child(child, root));
    }

    #[test]
    fn test_link_rejects_linked_child() {
        let mut tree = Tree::new();
        let root = element(&mut tree, "root");
        let other = element(&mut tree, "other");
        let child = element(&mut tree, "child");
        assert!(tree.link_child(root, child));
        assert!(!tree.link_child(other, child));
    }

    #[test]
    fn test_unlink_middle_child() {
        let mut tree = Tree::new();
        let root = element(&mut tree, "root");
        let a = element(&mut tree, "a");
        let b = element(&mut tree, "b");
        let c = element(&mut tree, "c");
        tree.link_child(root, a);
        tree.link_child(root, b);
        tree.link_child(root, c);

        tree.unlink(b);
        assert_eq!(tree.children_vec(root), vec![a, c]);
        assert_eq!(tree.parent(b), None);
    }

    #[test]
    fn test_attr_chain() {
        let mut tree = Tree::new();
        let elem = element(&mut tree, "e");
        let name = tree.strings.intern("x");
        let attr = tree.create_node(Payload::Attribute {
            name,
            ns: None,
            value: "1".to_string(),
        });
        assert!(tree.link_attr(elem, attr));
        assert_eq!(tree.attrs_vec(elem), vec![attr]);
        tree.unlink(attr);
        assert!(tree.attrs_vec(elem).is_empty());
    }

    #[test]
    fn test_free_subtree_recycles_slots() {
        let mut tree = Tree::new();
        let root = element(&mut tree, "root");
        let child = element(&mut tree, "child");
        let t = text(&mut tree, "hi");
        tree.link_child(root, child);
        tree.link_child(child, t);

        tree.free_subtree(root);
        assert!(tree.get(root).is_none());
        assert!(tree.get(child).is_none());
        assert!(tree.get(t).is_none());

        // double free is a no-op
        tree.free_subtree(root);

        // freed slots are reused
        let again = element(&mut tree, "again");
        assert!(tree.get(again).is_some());
    }

    #[test]
    fn test_free_subtree_releases_ns_defs() {
        let mut tree = Tree::new();
        let root = element(&mut tree, "root");
        let def = tree.create_ns(Some("p"), "http://example.com/p");
        tree.add_ns_def(root, def);
        tree.set_node_ns(root, Some(def));

        tree.free_subtree(root);
        assert!(tree.ns_def(def).is_none());
    }

    #[test]
    fn test_search_ns_by_prefix_walks_ancestors() {
        let mut tree = Tree::new();
        let root = element(&mut tree, "root");
        let child = element(&mut tree, "child");
        tree.link_child(root, child);
        let def = tree.create_ns(Some("p"), "http://example.com/p");
        tree.add_ns_def(root, def);

        assert_eq!(tree.search_ns_by_prefix(child, Some("p")), Some(def));
        assert_eq!(tree.search_ns_by_prefix(child, Some("q")), None);
        assert_eq!(tree.search_ns_by_prefix(child, None), None);
    }

    #[test]
    fn test_search_ns_shadowing_finds_nearest() {
        let mut tree = Tree::new();
        let root = element(&mut tree, "root");
        let child = element(&mut tree, "child");
        tree.link_child(root, child);
        let outer = tree.create_ns(Some("p"), "http://example.com/outer");
        let inner = tree.create_ns(Some("p"), "http://example.com/inner");
        tree.add_ns_def(root, outer);
        tree.add_ns_def(child, inner);

        assert_eq!(tree.search_ns_by_prefix(child, Some("p")), Some(inner));
        assert_eq!(tree.search_ns_by_prefix(root, Some("p")), Some(outer));
    }

    #[test]
    fn test_string_value_concatenates_text() {
        let mut tree = Tree::new();
        let root = element(&mut tree, "root");
        let inner = element(&mut tree, "inner");
        let t1 = text(&mut tree, "a");
        let t2 = text(&mut tree, "b");
        tree.link_child(root, t1);
        tree.link_child(root, inner);
        tree.link_child(inner, t2);
        assert_eq!(tree.string_value(root), "ab");
    }

    #[test]
    fn test_set_string_value_replaces_children() {
        let mut tree = Tree::new();
        let root = element(&mut tree, "root");
        let old = element(&mut tree, "old");
        tree.link_child(root, old);

        tree.set_string_value(root, "new text");
        assert!(tree.get(old).is_none());
        assert_eq!(tree.string_value(root), "new text");
        assert_eq!(tree.children_vec(root).len(), 1);
    }

    #[test]
    fn test_copy_subtree_is_deep_and_detached() {
        let mut tree = Tree::new();
        let root = element(&mut tree, "root");
        let child = element(&mut tree, "child");
        let t = text(&mut tree, "hi");
        tree.link_child(root, child);
        tree.link_child(child, t);

        let copy = tree.copy_subtree(root).unwrap();
        assert_ne!(copy, root);
        assert_eq!(tree.parent(copy), None);
        let copied_children = tree.children_vec(copy);
        assert_eq!(copied_children.len(), 1);
        assert_eq!(tree.name(copied_children[0]), Some("child"));
        assert_eq!(tree.string_value(copy), "hi");

        // mutating the copy leaves the source untouched
        tree.set_string_value(copy, "changed");
        assert_eq!(tree.string_value(root), "hi");
    }

    #[test]
    fn test_copy_materializes_ancestor_binding_on_root() {
        let mut tree = Tree::new();
        let root = element(&mut tree, "root");
        let child = element(&mut tree, "child");
        tree.link_child(root, child);
        let def = tree.create_ns(Some("p"), "http://example.com/p");
        tree.add_ns_def(root, def);
        tree.set_node_ns(child, Some(def));

        // copying just the child must re-declare p on the copy
        let copy = tree.copy_subtree(child).unwrap();
        let copied_defs = tree.ns_defs_of(copy);
        assert_eq!(copied_defs.len(), 1);
        let copied_def = tree.ns_def(copied_defs[0]).unwrap();
        assert_eq!(copied_def.prefix.as_deref(), Some("p"));
        assert_eq!(&*copied_def.uri, "http://example.com/p");
        assert_eq!(tree.node_ns(copy), Some(copied_defs[0]));
    }

    #[test]
    fn test_cross_tree_implant() {
        let mut src = Tree::new();
        let root = element(&mut src, "root");
        let t = text(&mut src, "payload");
        src.link_child(root, t);

        let sub = src.extract(root).unwrap();
        let mut dst = Tree::new();
        let implanted = dst.implant(&sub);
        assert_eq!(dst.name(implanted), Some("root"));
        assert_eq!(dst.string_value(implanted), "payload");
    }
}
