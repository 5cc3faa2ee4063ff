use racer_core::path::{may_impact, parse_path, path_to_string, prefix_of};
use racer_core::Segment;

fn xorshift(state: &mut u64) -> u64 {
    let mut x = *state;
    x ^= x << 13;
    x ^= x >> 7;
    x ^= x << 17;
    *state = x;
    x
}

fn random_dotted(state: &mut u64) -> String {
    let tokens = ["a", "b", "items", "0", "17", "deep", "404", "x1"];
    let len = (xorshift(state) % 5) as usize;
    (0..len)
        .map(|_| tokens[(xorshift(state) % tokens.len() as u64) as usize])
        .collect::<Vec<_>>()
        .join(".")
}

#[test]
fn canonicalization_is_idempotent_for_seeded_inputs() {
    for seed in [0x5eed_c0de_u64, 1, 0xff, 0xc0ffee, 0x0123_4567_89ab_cdef] {
        let mut state = seed;
        for _ in 0..200 {
            let input = random_dotted(&mut state);
            let once = parse_path(&input);
            let twice = parse_path(&path_to_string(&once));
            assert_eq!(twice, once, "idempotence broke for {input:?} seed={seed}");
        }
    }
}

#[test]
fn digit_tokens_always_coerce_to_indices() {
    for n in [0usize, 1, 9, 10, 42, 999, 100_000] {
        let parsed = parse_path(&n.to_string());
        assert_eq!(parsed, vec![Segment::Index(n)]);
    }
    // Mixed tokens keep digits as indices in place.
    assert_eq!(
        parse_path("xs.007"),
        vec![Segment::Key("xs".into()), Segment::Index(7)],
        "leading zeros still read as a number"
    );
    assert_eq!(
        parse_path("xs.1a"),
        vec![Segment::Key("xs".into()), Segment::Key("1a".into())]
    );
}

#[test]
fn impact_holds_iff_either_path_is_a_prefix() {
    fn naive_prefix(a: &[Segment], b: &[Segment]) -> bool {
        b.len() >= a.len() && &b[..a.len()] == a
    }
    for seed in [0xdead_beef_u64, 7, 0xabc] {
        let mut state = seed;
        for _ in 0..300 {
            let a = parse_path(&random_dotted(&mut state));
            let b = parse_path(&random_dotted(&mut state));
            let expected = naive_prefix(&a, &b) || naive_prefix(&b, &a);
            assert_eq!(
                may_impact(&a, &b),
                expected,
                "impact law broke for {a:?} / {b:?}"
            );
            assert_eq!(prefix_of(&a, &b), naive_prefix(&a, &b));
        }
    }
}

#[test]
fn the_empty_path_prefixes_everything() {
    let root: Vec<Segment> = Vec::new();
    for input in ["", "a", "a.b.c", "0.1"] {
        let path = parse_path(input);
        assert!(prefix_of(&root, &path));
        assert!(may_impact(&root, &path));
    }
}
