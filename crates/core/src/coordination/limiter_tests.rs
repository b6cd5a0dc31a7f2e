use super::*;
use crate::id::RequestId;
use proptest::prelude::*;

fn worker(id: &str) -> WorkerId {
    WorkerId::new(id)
}

fn ticket(w: &str, r: &str) -> Ticket {
    Ticket::new(worker(w), RequestId::new(r))
}

#[test]
fn new_limiter_has_full_capacity() {
    let limiter = Limiter::new(LimiterConfig::new("threads", 3));
    assert_eq!(limiter.used(), 0);
    assert_eq!(limiter.available(), Some(3));
    assert!(limiter.can_acquire());
}

#[test]
fn acquire_denies_when_full() {
    let mut limiter = Limiter::new(LimiterConfig::new("threads", 2));

    assert!(limiter.acquire(&worker("a")));
    assert!(limiter.acquire(&worker("b")));
    assert!(!limiter.acquire(&worker("c")));

    assert_eq!(limiter.used(), 2);
    assert_eq!(limiter.available(), Some(0));
}

#[test]
fn acquire_is_reentrant_per_worker() {
    let mut limiter = Limiter::new(LimiterConfig::new("threads", 3));

    assert!(limiter.acquire(&worker("a")));
    assert!(limiter.acquire(&worker("a")));
    assert_eq!(limiter.held_by(&worker("a")), 2);

    assert!(limiter.release(&worker("a")));
    assert_eq!(limiter.held_by(&worker("a")), 1);
    assert!(limiter.release(&worker("a")));
    assert_eq!(limiter.held_by(&worker("a")), 0);
    assert!(!limiter.release(&worker("a")));
}

#[test]
fn release_of_unknown_worker_frees_nothing() {
    let mut limiter = Limiter::new(LimiterConfig::new("threads", 1));
    assert!(limiter.acquire(&worker("a")));
    assert!(!limiter.release(&worker("b")));
    assert_eq!(limiter.used(), 1);
}

#[test]
fn unbounded_limiter_always_grants() {
    let mut limiter = Limiter::new(LimiterConfig::unbounded("reads"));
    for i in 0..1000 {
        assert!(limiter.acquire(&worker(&format!("w{}", i % 7))));
    }
    assert_eq!(limiter.used(), 1000);
    assert_eq!(limiter.available(), None);
}

#[test]
fn clean_worker_drops_only_that_worker() {
    let mut limiter = Limiter::new(LimiterConfig::new("threads", 4));
    limiter.acquire(&worker("a"));
    limiter.acquire(&worker("a"));
    limiter.acquire(&worker("b"));
    limiter.enqueue(ticket("a", "r9"));
    limiter.enqueue(ticket("b", "r10"));

    assert_eq!(limiter.clean(Some(&worker("a"))), 2);

    assert_eq!(limiter.held_by(&worker("a")), 0);
    assert_eq!(limiter.held_by(&worker("b")), 1);
    assert_eq!(limiter.waiting_len(), 1);
    assert!(limiter.is_waiting(&ticket("b", "r10")));
}

#[test]
fn clean_all_resets() {
    let mut limiter = Limiter::new(LimiterConfig::new("threads", 2));
    limiter.acquire(&worker("a"));
    limiter.acquire(&worker("b"));
    limiter.enqueue(ticket("c", "r1"));

    assert_eq!(limiter.clean(None), 2);
    assert_eq!(limiter.used(), 0);
    assert_eq!(limiter.waiting_len(), 0);
}

#[test]
fn waiters_promote_in_fifo_order() {
    let mut limiter = Limiter::new(LimiterConfig::new("threads", 1));
    assert!(limiter.acquire(&worker("a")));
    limiter.enqueue(ticket("b", "1"));
    limiter.enqueue(ticket("c", "2"));

    assert_eq!(limiter.promote_waiter(), None);

    limiter.release(&worker("a"));
    assert_eq!(limiter.promote_waiter(), Some(ticket("b", "1")));
    assert_eq!(limiter.promote_waiter(), None);

    limiter.release(&worker("b"));
    assert_eq!(limiter.promote_waiter(), Some(ticket("c", "2")));
    assert_eq!(limiter.waiting_len(), 0);
}

#[test]
fn remove_waiter_cancels_one_ticket() {
    let mut limiter = Limiter::new(LimiterConfig::new("threads", 1));
    limiter.enqueue(ticket("a", "1"));
    limiter.enqueue(ticket("a", "2"));

    assert!(limiter.remove_waiter(&ticket("a", "1")));
    assert!(!limiter.remove_waiter(&ticket("a", "1")));
    assert_eq!(limiter.waiting_len(), 1);
}

#[test]
fn snapshot_reports_holders() {
    let mut limiter = Limiter::new(LimiterConfig::new("threads", 3));
    limiter.acquire(&worker("a"));
    limiter.acquire(&worker("a"));
    limiter.enqueue(ticket("b", "1"));

    let snap = limiter.snapshot();
    assert_eq!(snap.name, "threads");
    assert_eq!(snap.capacity, 3);
    assert_eq!(snap.used, 2);
    assert_eq!(snap.holders.get("a"), Some(&2));
    assert_eq!(snap.waiting, 1);
}

#[derive(Clone, Debug)]
enum Op {
    Acquire(u8),
    Release(u8),
    Clean(u8),
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0u8..4).prop_map(Op::Acquire),
        (0u8..4).prop_map(Op::Release),
        (0u8..4).prop_map(Op::Clean),
    ]
}

proptest! {
    #[test]
    fn held_slots_never_exceed_capacity(
        capacity in 1u32..5,
        ops in proptest::collection::vec(arb_op(), 0..64)
    ) {
        let mut limiter = Limiter::new(LimiterConfig::new("prop", capacity));
        for op in ops {
            match op {
                Op::Acquire(w) => { limiter.acquire(&worker(&w.to_string())); }
                Op::Release(w) => { limiter.release(&worker(&w.to_string())); }
                Op::Clean(w) => { limiter.clean(Some(&worker(&w.to_string()))); }
            }
            prop_assert!(limiter.used() <= capacity);
        }
    }
}
