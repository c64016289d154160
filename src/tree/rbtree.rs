//! The classical red-black tree, expressed over a `NodeStore` so the
//! nodes can live inside table records. Positions are arena indexes into
//! the table; NIL is the absent child. The store keeps the root.

use crate::error::{DbError, DbResult};
use crate::types::{Pos, NIL};

use super::node::{Node, NodeColor, NodeStore};

/// The leftmost position of the subtree under `pos`.
pub fn minimum<S: NodeStore>(store: &mut S, mut pos: Pos) -> DbResult<Pos> {
    if pos == NIL {
        return Ok(NIL);
    }
    loop {
        let left = store.load(pos)?.left;
        if left == NIL {
            return Ok(pos);
        }
        pos = left;
    }
}

/// The rightmost position of the subtree under `pos`.
pub fn maximum<S: NodeStore>(store: &mut S, mut pos: Pos) -> DbResult<Pos> {
    if pos == NIL {
        return Ok(NIL);
    }
    loop {
        let right = store.load(pos)?.right;
        if right == NIL {
            return Ok(pos);
        }
        pos = right;
    }
}

/// The next position in key order, NIL after the last one.
pub fn successor<S: NodeStore>(store: &mut S, pos: Pos) -> DbResult<Pos> {
    let node = store.load(pos)?;
    if node.right != NIL {
        return minimum(store, node.right);
    }
    let mut child = pos;
    let mut parent = node.parent;
    while parent != NIL {
        let pnode = store.load(parent)?;
        if pnode.left == child {
            return Ok(parent);
        }
        child = parent;
        parent = pnode.parent;
    }
    Ok(NIL)
}

/// The previous position in key order, NIL before the first one.
pub fn predecessor<S: NodeStore>(store: &mut S, pos: Pos) -> DbResult<Pos> {
    let node = store.load(pos)?;
    if node.left != NIL {
        return maximum(store, node.left);
    }
    let mut child = pos;
    let mut parent = node.parent;
    while parent != NIL {
        let pnode = store.load(parent)?;
        if pnode.right == child {
            return Ok(parent);
        }
        child = parent;
        parent = pnode.parent;
    }
    Ok(NIL)
}

/// The first position whose key is not less than `key`.
pub fn lower_bound<S: NodeStore>(store: &mut S, key: &S::Key) -> DbResult<Pos> {
    let mut pos = store.root();
    let mut result = NIL;
    while pos != NIL {
        if &store.key_of(pos)? >= key {
            result = pos;
            pos = store.load(pos)?.left;
        } else {
            pos = store.load(pos)?.right;
        }
    }
    Ok(result)
}

/// The first position whose key is greater than `key`.
pub fn upper_bound<S: NodeStore>(store: &mut S, key: &S::Key) -> DbResult<Pos> {
    let mut pos = store.root();
    let mut result = NIL;
    while pos != NIL {
        if &store.key_of(pos)? > key {
            result = pos;
            pos = store.load(pos)?.left;
        } else {
            pos = store.load(pos)?.right;
        }
    }
    Ok(result)
}

/// A position holding exactly `key`, NIL when absent.
pub fn find<S: NodeStore>(store: &mut S, key: &S::Key) -> DbResult<Pos> {
    let pos = lower_bound(store, key)?;
    if pos != NIL && &store.key_of(pos)? == key {
        return Ok(pos);
    }
    Ok(NIL)
}

fn set_color<S: NodeStore>(store: &mut S, pos: Pos, color: NodeColor) -> DbResult {
    let mut node = store.load(pos)?;
    node.color = color;
    store.store(pos, &node)
}

fn color_of<S: NodeStore>(store: &mut S, pos: Pos) -> DbResult<NodeColor> {
    if pos == NIL {
        return Ok(NodeColor::Black);
    }
    Ok(store.load(pos)?.color)
}

fn left_rotate<S: NodeStore>(store: &mut S, x: Pos) -> DbResult {
    let mut xn = store.load(x)?;
    let y = xn.right;
    let mut yn = store.load(y)?;

    xn.right = yn.left;
    if yn.left != NIL {
        let mut t = store.load(yn.left)?;
        t.parent = x;
        store.store(yn.left, &t)?;
    }
    yn.parent = xn.parent;
    if xn.parent == NIL {
        store.set_root(y)?;
    } else {
        let mut p = store.load(xn.parent)?;
        if p.left == x {
            p.left = y;
        } else {
            p.right = y;
        }
        store.store(xn.parent, &p)?;
    }
    yn.left = x;
    xn.parent = y;
    store.store(x, &xn)?;
    store.store(y, &yn)
}

fn right_rotate<S: NodeStore>(store: &mut S, x: Pos) -> DbResult {
    let mut xn = store.load(x)?;
    let y = xn.left;
    let mut yn = store.load(y)?;

    xn.left = yn.right;
    if yn.right != NIL {
        let mut t = store.load(yn.right)?;
        t.parent = x;
        store.store(yn.right, &t)?;
    }
    yn.parent = xn.parent;
    if xn.parent == NIL {
        store.set_root(y)?;
    } else {
        let mut p = store.load(xn.parent)?;
        if p.left == x {
            p.left = y;
        } else {
            p.right = y;
        }
        store.store(xn.parent, &p)?;
    }
    yn.right = x;
    xn.parent = y;
    store.store(x, &xn)?;
    store.store(y, &yn)
}

/// Hook the node at `z` (already written as a fresh red leaf) into the
/// tree by its key and rebalance. Equal keys go right, so records with
/// the same index field keep insertion order in the in-order walk.
pub fn insert<S: NodeStore>(store: &mut S, z: Pos) -> DbResult {
    let zkey = store.key_of(z)?;
    let mut y = NIL;
    let mut x = store.root();
    while x != NIL {
        y = x;
        let xn = store.load(x)?;
        x = if zkey < store.key_of(x)? { xn.left } else { xn.right };
    }

    let mut zn = store.load(z)?;
    zn.parent = y;
    zn.left = NIL;
    zn.right = NIL;
    zn.color = NodeColor::Red;
    store.store(z, &zn)?;

    if y == NIL {
        store.set_root(z)?;
    } else {
        let mut yn = store.load(y)?;
        if zkey < store.key_of(y)? {
            yn.left = z;
        } else {
            yn.right = z;
        }
        store.store(y, &yn)?;
    }
    insert_fixup(store, z)
}

fn insert_fixup<S: NodeStore>(store: &mut S, mut z: Pos) -> DbResult {
    loop {
        let zp = store.load(z)?.parent;
        if zp == NIL || color_of(store, zp)? != NodeColor::Red {
            break;
        }
        let zpp = store.load(zp)?.parent;
        if zpp == NIL {
            break;
        }
        let gp = store.load(zpp)?;
        if gp.left == zp {
            let uncle = gp.right;
            if color_of(store, uncle)? == NodeColor::Red {
                set_color(store, zp, NodeColor::Black)?;
                set_color(store, uncle, NodeColor::Black)?;
                set_color(store, zpp, NodeColor::Red)?;
                z = zpp;
            } else {
                if store.load(zp)?.right == z {
                    z = zp;
                    left_rotate(store, z)?;
                }
                let zp = store.load(z)?.parent;
                let zpp = store.load(zp)?.parent;
                set_color(store, zp, NodeColor::Black)?;
                set_color(store, zpp, NodeColor::Red)?;
                right_rotate(store, zpp)?;
            }
        } else {
            let uncle = gp.left;
            if color_of(store, uncle)? == NodeColor::Red {
                set_color(store, zp, NodeColor::Black)?;
                set_color(store, uncle, NodeColor::Black)?;
                set_color(store, zpp, NodeColor::Red)?;
                z = zpp;
            } else {
                if store.load(zp)?.left == z {
                    z = zp;
                    right_rotate(store, z)?;
                }
                let zp = store.load(z)?.parent;
                let zpp = store.load(zp)?.parent;
                set_color(store, zp, NodeColor::Black)?;
                set_color(store, zpp, NodeColor::Red)?;
                left_rotate(store, zpp)?;
            }
        }
    }
    let root = store.root();
    if root != NIL {
        set_color(store, root, NodeColor::Black)?;
    }
    Ok(())
}

/// Replace the subtree rooted at `u` with the one rooted at `v`.
fn transplant<S: NodeStore>(store: &mut S, u: Pos, v: Pos) -> DbResult {
    let up = store.load(u)?.parent;
    if up == NIL {
        store.set_root(v)?;
    } else {
        let mut p = store.load(up)?;
        if p.left == u {
            p.left = v;
        } else {
            p.right = v;
        }
        store.store(up, &p)?;
    }
    if v != NIL {
        let mut vn = store.load(v)?;
        vn.parent = up;
        store.store(v, &vn)?;
    }
    Ok(())
}

/// Detach the node at `z` from the tree and rebalance. The record itself
/// stays in the table; physical removal is the table's business.
pub fn unlink<S: NodeStore>(store: &mut S, z: Pos) -> DbResult {
    let zn = store.load(z)?;
    let (y, y_color) = if zn.left == NIL || zn.right == NIL {
        (z, zn.color)
    } else {
        let m = minimum(store, zn.right)?;
        (m, store.load(m)?.color)
    };

    let yn = store.load(y)?;
    let x = if yn.left != NIL { yn.left } else { yn.right };
    let x_parent;

    if y == z {
        x_parent = zn.parent;
        transplant(store, z, x)?;
    } else {
        // y is the in-order successor inside z's right subtree
        if yn.parent == z {
            x_parent = y;
        } else {
            x_parent = yn.parent;
            transplant(store, y, x)?;
            let zr = store.load(z)?.right;
            let mut yn2 = store.load(y)?;
            yn2.right = zr;
            store.store(y, &yn2)?;
            let mut zrn = store.load(zr)?;
            zrn.parent = y;
            store.store(zr, &zrn)?;
        }
        transplant(store, z, y)?;
        let mut yn2 = store.load(y)?;
        yn2.left = zn.left;
        yn2.color = zn.color;
        store.store(y, &yn2)?;
        let mut zln = store.load(zn.left)?;
        zln.parent = y;
        store.store(zn.left, &zln)?;
    }

    if y_color == NodeColor::Black {
        remove_fixup(store, x, x_parent)?;
    }
    Ok(())
}

fn remove_fixup<S: NodeStore>(store: &mut S, mut x: Pos, mut x_parent: Pos) -> DbResult {
    while x != store.root() && color_of(store, x)? == NodeColor::Black {
        if x_parent == NIL {
            break;
        }
        let pn = store.load(x_parent)?;
        if pn.left == x {
            let mut w = pn.right;
            if w == NIL {
                break;
            }
            if color_of(store, w)? == NodeColor::Red {
                set_color(store, w, NodeColor::Black)?;
                set_color(store, x_parent, NodeColor::Red)?;
                left_rotate(store, x_parent)?;
                w = store.load(x_parent)?.right;
            }
            let wn = store.load(w)?;
            if color_of(store, wn.left)? == NodeColor::Black
                && color_of(store, wn.right)? == NodeColor::Black
            {
                set_color(store, w, NodeColor::Red)?;
                x = x_parent;
                x_parent = store.load(x)?.parent;
            } else {
                if color_of(store, wn.right)? == NodeColor::Black {
                    if wn.left != NIL {
                        set_color(store, wn.left, NodeColor::Black)?;
                    }
                    set_color(store, w, NodeColor::Red)?;
                    right_rotate(store, w)?;
                    w = store.load(x_parent)?.right;
                }
                let pc = color_of(store, x_parent)?;
                set_color(store, w, pc)?;
                set_color(store, x_parent, NodeColor::Black)?;
                let wr = store.load(w)?.right;
                if wr != NIL {
                    set_color(store, wr, NodeColor::Black)?;
                }
                left_rotate(store, x_parent)?;
                x = store.root();
                x_parent = NIL;
            }
        } else {
            let mut w = pn.left;
            if w == NIL {
                break;
            }
            if color_of(store, w)? == NodeColor::Red {
                set_color(store, w, NodeColor::Black)?;
                set_color(store, x_parent, NodeColor::Red)?;
                right_rotate(store, x_parent)?;
                w = store.load(x_parent)?.left;
            }
            let wn = store.load(w)?;
            if color_of(store, wn.right)? == NodeColor::Black
                && color_of(store, wn.left)? == NodeColor::Black
            {
                set_color(store, w, NodeColor::Red)?;
                x = x_parent;
                x_parent = store.load(x)?.parent;
            } else {
                if color_of(store, wn.left)? == NodeColor::Black {
                    if wn.right != NIL {
                        set_color(store, wn.right, NodeColor::Black)?;
                    }
                    set_color(store, w, NodeColor::Red)?;
                    left_rotate(store, w)?;
                    w = store.load(x_parent)?.left;
                }
                let pc = color_of(store, x_parent)?;
                set_color(store, w, pc)?;
                set_color(store, x_parent, NodeColor::Black)?;
                let wl = store.load(w)?.left;
                if wl != NIL {
                    set_color(store, wl, NodeColor::Black)?;
                }
                right_rotate(store, x_parent)?;
                x = store.root();
                x_parent = NIL;
            }
        }
    }
    if x != NIL {
        set_color(store, x, NodeColor::Black)?;
    }
    Ok(())
}

/// The table moved a live node from `source` to `dest`: repoint the
/// neighbours (and the root) at the new position. `node` is the moving
/// record's node image.
pub fn on_move<S: NodeStore>(store: &mut S, node: &Node, source: Pos, dest: Pos) -> DbResult {
    if node.parent != NIL {
        let mut p = store.load(node.parent)?;
        if p.left == source {
            p.left = dest;
        } else if p.right == source {
            p.right = dest;
        }
        store.store(node.parent, &p)?;
    } else if store.root() == source {
        store.set_root(dest)?;
    }
    if node.left != NIL {
        let mut l = store.load(node.left)?;
        l.parent = dest;
        store.store(node.left, &l)?;
    }
    if node.right != NIL {
        let mut r = store.load(node.right)?;
        r.parent = dest;
        store.store(node.right, &r)?;
    }
    Ok(())
}

/// Check the structural invariants; returns the node count.
/// Used by tests and by the tools' full-verification mode.
pub fn verify<S: NodeStore>(store: &mut S) -> DbResult<u32> {
    let root = store.root();
    if root == NIL {
        return Ok(0);
    }
    if store.load(root)?.color != NodeColor::Black {
        return Err(DbError::bug("rbtree: the root is red"));
    }
    if store.load(root)?.parent != NIL {
        return Err(DbError::bug("rbtree: the root has a parent"));
    }
    let mut count = 0;
    verify_node(store, root, &mut count)?;

    // the in-order walk must be sorted
    let mut pos = minimum(store, root)?;
    let mut walked = 0;
    let mut last: Option<S::Key> = None;
    while pos != NIL {
        let key = store.key_of(pos)?;
        if let Some(prev) = &last {
            if prev > &key {
                return Err(DbError::bug("rbtree: in-order walk is not sorted"));
            }
        }
        last = Some(key);
        walked += 1;
        pos = successor(store, pos)?;
    }
    if walked != count {
        return Err(DbError::bug("rbtree: the walk misses nodes"));
    }
    Ok(count)
}

/// Returns the black height of the subtree; checks colors and links.
fn verify_node<S: NodeStore>(store: &mut S, pos: Pos, count: &mut u32) -> DbResult<u32> {
    if pos == NIL {
        return Ok(1);
    }
    *count += 1;
    let node = store.load(pos)?;
    if node.color == NodeColor::Red {
        if color_of(store, node.left)? == NodeColor::Red
            || color_of(store, node.right)? == NodeColor::Red
        {
            return Err(DbError::bug("rbtree: a red node has a red child"));
        }
    }
    for child in [node.left, node.right].iter() {
        if *child != NIL && store.load(*child)?.parent != pos {
            return Err(DbError::bug("rbtree: a child disowns its parent"));
        }
    }
    let left_height = verify_node(store, node.left, count)?;
    let right_height = verify_node(store, node.right, count)?;
    if left_height != right_height {
        return Err(DbError::bug("rbtree: black heights differ"));
    }
    Ok(left_height
        + if node.color == NodeColor::Black {
            1
        } else {
            0
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    /// An in-memory arena store for exercising the algorithm alone.
    struct MapStore {
        nodes: HashMap<Pos, Node>,
        keys: HashMap<Pos, i64>,
        root: Pos,
    }

    impl MapStore {
        fn new() -> Self {
            MapStore {
                nodes: HashMap::new(),
                keys: HashMap::new(),
                root: NIL,
            }
        }

        fn put(&mut self, pos: Pos, key: i64) {
            self.nodes.insert(pos, Node::leaf());
            self.keys.insert(pos, key);
        }

        fn drop_node(&mut self, pos: Pos) {
            self.nodes.remove(&pos);
            self.keys.remove(&pos);
        }
    }

    impl NodeStore for MapStore {
        type Key = i64;

        fn load(&mut self, pos: Pos) -> DbResult<Node> {
            self.nodes
                .get(&pos)
                .cloned()
                .ok_or_else(|| DbError::bug(&format!("no node at {}", pos)))
        }

        fn store(&mut self, pos: Pos, node: &Node) -> DbResult {
            self.nodes.insert(pos, *node);
            Ok(())
        }

        fn key_of(&mut self, pos: Pos) -> DbResult<i64> {
            self.keys
                .get(&pos)
                .cloned()
                .ok_or_else(|| DbError::bug(&format!("no key at {}", pos)))
        }

        fn root(&self) -> Pos {
            self.root
        }

        fn set_root(&mut self, root: Pos) -> DbResult {
            self.root = root;
            Ok(())
        }
    }

    fn in_order(store: &mut MapStore) -> Vec<i64> {
        let mut keys = Vec::new();
        let root = store.root();
        let mut pos = minimum(store, root).unwrap();
        while pos != NIL {
            keys.push(store.key_of(pos).unwrap());
            pos = successor(store, pos).unwrap();
        }
        keys
    }

    #[test]
    fn test_insert_keeps_invariants() {
        let mut store = MapStore::new();
        let keys = [41, 38, 31, 12, 19, 8, 45, 20, 1, 33];
        for (i, key) in keys.iter().enumerate() {
            store.put(i as Pos, *key);
            insert(&mut store, i as Pos).unwrap();
            verify(&mut store).unwrap();
        }
        let mut sorted = keys.to_vec();
        sorted.sort_unstable();
        assert_eq!(in_order(&mut store), sorted);
    }

    #[test]
    fn test_unlink_keeps_invariants() {
        let mut store = MapStore::new();
        for i in 0..64u32 {
            store.put(i, (i as i64 * 37) % 101);
            insert(&mut store, i).unwrap();
        }
        // remove in a scrambled order
        for i in (0..64u32).map(|i| (i * 29) % 64) {
            unlink(&mut store, i).unwrap();
            store.drop_node(i);
            verify(&mut store).unwrap();
        }
        assert_eq!(store.root(), NIL);
    }

    #[test]
    fn test_duplicate_keys_walk_in_insertion_order() {
        let mut store = MapStore::new();
        for i in 0..8u32 {
            store.put(i, 7);
            insert(&mut store, i).unwrap();
        }
        verify(&mut store).unwrap();
        assert_eq!(in_order(&mut store), vec![7; 8]);
    }

    #[test]
    fn test_bounds_and_find() {
        let mut store = MapStore::new();
        for (i, key) in [10, 20, 20, 30, 40].iter().enumerate() {
            store.put(i as Pos, *key);
            insert(&mut store, i as Pos).unwrap();
        }
        let lb = lower_bound(&mut store, &20).unwrap();
        assert_eq!(store.key_of(lb).unwrap(), 20);
        let ub = upper_bound(&mut store, &20).unwrap();
        assert_eq!(store.key_of(ub).unwrap(), 30);
        assert_eq!(find(&mut store, &25).unwrap(), NIL);
        assert_ne!(find(&mut store, &40).unwrap(), NIL);
        assert_eq!(lower_bound(&mut store, &100).unwrap(), NIL);
    }

    #[test]
    fn test_on_move_rewires_neighbours() {
        let mut store = MapStore::new();
        for i in 0..10u32 {
            store.put(i, i as i64);
            insert(&mut store, i).unwrap();
        }
        // physically move node 3 to slot 77
        let node = store.load(3).unwrap();
        let key = store.key_of(3).unwrap();
        store.put(77, key);
        store.store(77, &node).unwrap();
        on_move(&mut store, &node, 3, 77).unwrap();
        store.drop_node(3);

        verify(&mut store).unwrap();
        assert_eq!(in_order(&mut store), (0..10).collect::<Vec<i64>>());
    }
}
