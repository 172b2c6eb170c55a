use fieldsync_common::change::{Assoc, ChangeSet, TextRange};
use proptest::prelude::*;

const ROUNDS_PER_CASE: usize = 200;

#[derive(Debug, Clone)]
struct Lcg {
    state: u64,
}

impl Lcg {
    fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    fn next_u64(&mut self) -> u64 {
        self.state = self.state.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(1);
        self.state >> 11
    }

    fn next_usize(&mut self, upper_exclusive: usize) -> usize {
        if upper_exclusive == 0 {
            return 0;
        }
        (self.next_u64() as usize) % upper_exclusive
    }
}

fn random_text(rng: &mut Lcg, max_len: usize) -> String {
    let len = rng.next_usize(max_len + 1);
    (0..len)
        .map(|_| match rng.next_usize(30) {
            0..=19 => char::from(b'a' + rng.next_usize(26) as u8),
            20..=24 => ' ',
            25 => '\n',
            26 => 'é',
            27 => 'ß',
            28 => '→',
            _ => '😀',
        })
        .collect()
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

/// One or two replacements over a document of `len` characters.
fn random_change(rng: &mut Lcg, len: usize) -> ChangeSet {
    let from = rng.next_usize(len + 1);
    let to = from + rng.next_usize(len - from + 1);
    let insert = random_text(rng, 4);
    let first = ChangeSet::replace(len, from, to, &insert).expect("range is in bounds");
    if rng.next_usize(2) == 0 {
        return first;
    }
    let next_len = first.new_len();
    let from = rng.next_usize(next_len + 1);
    let to = from + rng.next_usize((next_len - from).min(3) + 1);
    let insert = random_text(rng, 3);
    let second = ChangeSet::replace(next_len, from, to, &insert).expect("range is in bounds");
    first.compose(&second).expect("lengths line up")
}

fn run_composition(seed: u64) {
    let mut rng = Lcg::new(seed);
    for round in 0..ROUNDS_PER_CASE {
        let text = random_text(&mut rng, 24);
        let a = random_change(&mut rng, char_len(&text));
        let b = random_change(&mut rng, a.new_len());
        let c = random_change(&mut rng, b.new_len());

        let stepwise = c.apply(&b.apply(&a.apply(&text).unwrap()).unwrap()).unwrap();
        let left = a.compose(&b).unwrap().compose(&c).unwrap();
        let right = a.compose(&b.compose(&c).unwrap()).unwrap();
        assert_eq!(left.apply(&text).unwrap(), stepwise, "seed={seed} round={round}");
        assert_eq!(right.apply(&text).unwrap(), stepwise, "seed={seed} round={round}");
        assert_eq!(left.new_len(), right.new_len());
    }
}

fn run_concurrent_pair(seed: u64) {
    let mut rng = Lcg::new(seed);
    for round in 0..ROUNDS_PER_CASE {
        let text = random_text(&mut rng, 24);
        let len = char_len(&text);
        let a = random_change(&mut rng, len);
        let b = random_change(&mut rng, len);

        let a_first = b.map(&a, false).unwrap().apply(&a.apply(&text).unwrap()).unwrap();
        let b_first = a.map(&b, true).unwrap().apply(&b.apply(&text).unwrap()).unwrap();
        assert_eq!(a_first, b_first, "diverged, seed={seed} round={round} text={text:?}");
    }
}

fn run_range_mapping(seed: u64) {
    let mut rng = Lcg::new(seed);
    for _ in 0..ROUNDS_PER_CASE {
        let text = random_text(&mut rng, 24);
        let len = char_len(&text);
        let change = random_change(&mut rng, len);
        for pos in 0..=len {
            let before = change.map_pos(pos, Assoc::Before).unwrap();
            let after = change.map_pos(pos, Assoc::After).unwrap();
            assert!(before <= after && after <= change.new_len());
        }
        assert_eq!(change.map_pos(len + 1, Assoc::After), None);

        let from = rng.next_usize(len + 1);
        let to = from + rng.next_usize(len - from + 1);
        if let Some(mapped) = (TextRange { from, to }).map(&change) {
            assert!(mapped.from < mapped.to && mapped.to <= change.new_len());
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 16,
        max_shrink_iters: 64,
        .. ProptestConfig::default()
    })]

    #[test]
    fn compose_is_associative_and_matches_sequential_apply(seed in any::<u64>()) {
        run_composition(seed);
    }

    #[test]
    fn concurrent_changes_converge_in_either_order(seed in any::<u64>()) {
        run_concurrent_pair(seed);
    }

    #[test]
    fn mapped_positions_stay_in_bounds(seed in any::<u64>()) {
        run_range_mapping(seed);
    }
}
