use super::*;
use maplit::{hashmap, hashset};

fn provider(map: HashMap<&'static str, Vec<&'static str>>) -> DictParentsProvider<&'static str> {
    DictParentsProvider::from(map)
}

/// The criss-cross graph from the module docs: D and E are the LCAs of G
/// and H, A is the unique LCA.
fn criss_cross() -> HashMap<&'static str, Vec<&'static str>> {
    hashmap! {
        "a" => vec![],
        "b" => vec!["a"],
        "c" => vec!["a"],
        "d" => vec!["b"],
        "e" => vec!["c"],
        "f" => vec!["c"],
        "g" => vec!["d", "e"],
        "h" => vec!["d", "e", "f"],
    }
}

#[test]
fn test_find_ancestry() {
    let p = provider(criss_cross());
    let g = Graph::new(&p);
    assert_eq!(
        g.find_ancestry(&["g"]),
        hashset! {"g", "d", "e", "b", "c", "a"}
    );
}

#[test]
fn test_heads() {
    let p = provider(criss_cross());
    let g = Graph::new(&p);
    assert_eq!(g.heads(&["g", "h"]), hashset! {"g", "h"});
    assert_eq!(g.heads(&["g", "d"]), hashset! {"g"});
    assert_eq!(g.heads(&["g"]), hashset! {"g"});
    assert_eq!(g.heads(&["a", "b", "c"]), hashset! {"b", "c"});
}

#[test]
fn test_find_lca_criss_cross() {
    let p = provider(criss_cross());
    let g = Graph::new(&p);
    assert_eq!(g.find_lca(&["g", "h"]), hashset! {"d", "e"});
    assert_eq!(g.find_unique_lca(&"g", &"h"), Some("a"));
}

#[test]
fn test_find_lca_ancestor_shortcut() {
    let p = provider(criss_cross());
    let g = Graph::new(&p);
    // when one side is an ancestor of the other it is the only LCA
    assert_eq!(g.find_lca(&["d", "g"]), hashset! {"d"});
}

#[test]
fn test_find_lca_unrelated() {
    let p = provider(hashmap! {"a" => vec![], "b" => vec![]});
    let g = Graph::new(&p);
    assert_eq!(g.find_lca(&["a", "b"]), hashset! {});
    assert_eq!(g.find_unique_lca(&"a", &"b"), None);
}

#[test]
fn test_is_ancestor() {
    let p = provider(criss_cross());
    let g = Graph::new(&p);
    assert!(g.is_ancestor(&"a", &"g"));
    assert!(g.is_ancestor(&"g", &"g"));
    assert!(!g.is_ancestor(&"g", &"a"));
    assert!(!g.is_ancestor(&"f", &"g"));
}

#[test]
fn test_find_unique_ancestors() {
    let p = provider(criss_cross());
    let g = Graph::new(&p);
    assert_eq!(g.find_unique_ancestors(&"g", &["d"]), hashset! {"g", "e", "c"});
}

#[test]
fn test_find_merge_order_left_first() {
    let p = provider(criss_cross());
    let g = Graph::new(&p);
    // 'd' is on h's left-hand spine, so it is reached before 'e'
    assert_eq!(
        g.find_merge_order(&"h", &hashset! {"d", "e"}),
        vec!["d", "e"]
    );
}

#[test]
fn test_iter_ancestry_reports_ghosts() {
    let p = provider(hashmap! {"b" => vec!["a", "ghost"], "a" => vec![]});
    let g = Graph::new(&p);
    let anc = g.iter_ancestry(&["b"]);
    assert_eq!(anc.get(&"ghost"), Some(&Parents::Ghost));
    assert_eq!(anc.get(&"a"), Some(&Parents::Known(vec![])));
}

#[test]
fn test_collapse_linear_regions() {
    // a <- b <- c with b linear collapses to a <- c
    let collapsed = collapse_linear_regions(&ParentMap::from(hashmap! {
        "a" => vec![],
        "b" => vec!["a"],
        "c" => vec!["b"],
    }));
    assert!(!collapsed.contains_key(&"b"));
    assert_eq!(collapsed.get(&"c"), Some(&Parents::Known(vec!["a"])));
    assert_eq!(collapsed.get(&"a"), Some(&Parents::Known(vec![])));
}

#[test]
fn test_collapse_keeps_forks() {
    let original = ParentMap::from(hashmap! {
        "a" => vec![],
        "b" => vec!["a"],
        "c" => vec!["a"],
        "d" => vec!["b", "c"],
    });
    assert_eq!(collapse_linear_regions(&original), original);
}

#[test]
fn test_stacked_parents_provider() {
    let p1 = provider(hashmap! {"b" => vec!["a"]});
    let p2 = provider(hashmap! {"a" => vec![], "b" => vec!["WRONG"]});
    let stacked = StackedParentsProvider::new(vec![Box::new(p1), Box::new(p2)]);
    let map = stacked.get_parent_map(&hashset! {"a", "b"});
    assert_eq!(map.get(&"b"), Some(&Parents::Known(vec!["a"])));
    assert_eq!(map.get(&"a"), Some(&Parents::Known(vec![])));
}
