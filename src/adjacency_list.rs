use std::collections::HashMap;
use core::hash::Hash;




/**
 * A minimal directed graph structure that stores only edges, each carrying a
 * payload of type `E`. Edges are kept in insertion order on both ends.
 */
pub struct AdjacencyList<K, E = ()> {
    outgoing: HashMap<K, Vec<(K, E)>>,
    incoming: HashMap<K, Vec<(K, E)>>,
}




// ============================================================================
impl<K, E> AdjacencyList<K, E> where K: Hash + Eq + Clone, E: Clone {


    pub fn new() -> Self {
        Self::default()
    }


    /**
     * Return the number of edges in the graph.
     */
    pub fn len(&self) -> usize {
        self.incoming.values().map(Vec::len).sum()
    }


    /**
     * Determine whether there are any edges in the graph.
     */
    pub fn is_empty(&self) -> bool {
        self.incoming.values().all(Vec::is_empty)
    }


    /**
     * Insert an edge from a -> b with the given payload. Duplicate and
     * circular edges are allowed.
     */
    pub fn insert(&mut self, a: K, b: K, edge: E) {
        self.outgoing.entry(a.clone()).or_default().push((b.clone(), edge.clone()));
        self.incoming.entry(b).or_default().push((a, edge));
    }


    /**
     * Determine whether any edge a -> b exists.
     */
    pub fn contains(&self, a: &K, b: &K) -> bool {
        self.outgoing_edges(a).any(|(k, _)| k == b)
    }


    /**
     * Remove every edge a -> b.
     */
    pub fn remove(&mut self, a: &K, b: &K) {
        if let Some(edges) = self.outgoing.get_mut(a) {
            edges.retain(|(k, _)| k != b)
        }
        if let Some(edges) = self.incoming.get_mut(b) {
            edges.retain(|(k, _)| k != a)
        }
    }


    /**
     * Return an iterator over the destinations and payloads of the edges
     * emanating from the given vertex.
     */
    pub fn outgoing_edges(&self, a: &K) -> impl Iterator<Item = &(K, E)> {
        self.outgoing.get(a).into_iter().flat_map(|edges| edges.iter())
    }


    /**
     * Return an iterator over the sources and payloads of the edges pointing
     * to the given vertex.
     */
    pub fn incoming_edges(&self, b: &K) -> impl Iterator<Item = &(K, E)> {
        self.incoming.get(b).into_iter().flat_map(|edges| edges.iter())
    }


    /**
     * Group the edges leaving `a` by destination, in order of first
     * appearance, collecting the payloads of each group.
     */
    pub fn outgoing_groups(&self, a: &K) -> Vec<(K, Vec<E>)> {
        group(self.outgoing_edges(a))
    }


    /**
     * Group the edges arriving at `b` by source, in order of first
     * appearance.
     */
    pub fn incoming_groups(&self, b: &K) -> Vec<(K, Vec<E>)> {
        group(self.incoming_edges(b))
    }
}

impl<K, E> Default for AdjacencyList<K, E> {
    fn default() -> Self {
        Self {
            outgoing: HashMap::new(),
            incoming: HashMap::new(),
        }
    }
}




fn group<'a, K, E>(edges: impl Iterator<Item = &'a (K, E)>) -> Vec<(K, Vec<E>)>
where
    K: Eq + Clone + 'a,
    E: Clone + 'a,
{
    let mut groups: Vec<(K, Vec<E>)> = Vec::new();

    for (k, e) in edges {
        match groups.iter_mut().find(|(g, _)| g == k) {
            Some((_, payloads)) => payloads.push(e.clone()),
            None => groups.push((k.clone(), vec![e.clone()])),
        }
    }
    groups
}
