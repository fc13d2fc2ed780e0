//! AND/OR combinator semantics under the interleavings of spec interest.

use cancel_token::{all, race, Reason, Source, Token};

#[test]
fn all_requires_both() {
    let t1 = Source::new();
    let t2 = Source::new();
    let combined = all([t1.token(), t2.token()]);

    t1.cancel("reason1");
    assert!(!combined.is_cancelled());

    t2.cancel("reason2");
    assert!(combined.is_cancelled());
    assert_eq!(
        combined.reason().unwrap(),
        Reason::Joined(vec![Reason::from("reason1"), Reason::from("reason2")])
    );
}

#[test]
fn all_with_uncancellable_member_is_uncancellable() {
    let t2 = Source::new();
    let combined = all([Token::never(), t2.token()]);
    assert!(!combined.can_be_cancelled());
    t2.cancel("does nothing");
    assert!(!combined.is_cancelled());
}

#[test]
fn all_mixed_prefired_and_live() {
    let live = Source::new();
    let combined = all([Token::cancelled("pre"), live.token()]);

    assert!(!combined.is_cancelled());
    live.cancel("post");
    assert_eq!(
        combined.reason().unwrap(),
        Reason::Joined(vec![Reason::from("pre"), Reason::from("post")])
    );
}

#[test]
fn race_fires_on_first() {
    let t1 = Source::new();
    let t2 = Source::new();
    let combined = race([t1.token(), t2.token()]);

    t2.cancel("second input, first to fire");
    assert!(combined.is_cancelled());
    assert_eq!(
        combined.reason().unwrap(),
        Reason::from("second input, first to fire")
    );
}

#[test]
fn race_identity_fast_path() {
    let t1 = Token::cancelled("early");
    let t2 = Source::new();
    let combined = race([t1.clone(), t2.token()]);
    assert!(combined.ptr_eq(&t1));
}

#[test]
fn race_later_inputs_are_absorbed() {
    let t1 = Source::new();
    let t2 = Source::new();
    let combined = race([t1.token(), t2.token()]);

    t1.cancel("winner");
    t2.cancel("loser");
    assert_eq!(combined.reason().unwrap(), Reason::from("winner"));
}

#[test]
fn race_ignores_never_participants() {
    let live = Source::new();
    let combined = race([Token::never(), live.token(), Token::never()]);
    live.cancel("only live input");
    assert_eq!(combined.reason().unwrap(), Reason::from("only live input"));
}

#[test]
fn nested_combinators_propagate() {
    let a = Source::new();
    let b = Source::new();
    let c = Source::new();

    // (a AND b) OR c
    let combined = race([all([a.token(), b.token()]), c.token()]);
    c.cancel("outer or wins");
    assert_eq!(combined.reason().unwrap(), Reason::from("outer or wins"));

    // a and b still behave independently afterwards.
    a.cancel("a");
    b.cancel("b");
    assert_eq!(combined.reason().unwrap(), Reason::from("outer or wins"));
}

#[test]
fn duplicated_input_counts_per_slot() {
    let only = Source::new();
    let combined = all([only.token(), only.token()]);
    only.cancel("twice");
    assert!(combined.is_cancelled());
    assert_eq!(
        combined.reason().unwrap(),
        Reason::Joined(vec![Reason::from("twice"), Reason::from("twice")])
    );
}
