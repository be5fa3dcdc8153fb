//! Randomized play against the match engine.
//!
//! Drives rooms with seeded random action sequences and checks the
//! state invariants after every step.

use std::collections::BTreeSet;

use memory_match::game::state::{
    BelowMinimumPolicy, ConnectionId, FlipOutcome, GameSession, MatchConfig, ResolveTicket,
    SessionPhase,
};
use memory_match::DeterministicRng;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn conn(n: u8) -> ConnectionId {
    ConnectionId::new([n; 16])
}

fn check_invariants(game: &GameSession) {
    let revealed: BTreeSet<u32> = game.revealed().iter().copied().collect();

    assert!(game.revealed().len() <= 2);
    assert_eq!(revealed.len(), game.revealed().len(), "duplicate reveal");
    assert!(revealed.is_disjoint(game.matched()));

    if !game.turn_order().is_empty() {
        assert!(game.current_turn_index() < game.turn_order().len());
    }
    for id in game.turn_order() {
        assert!(game.player(id).is_some(), "turn order holds a departed player");
    }

    match game.phase() {
        SessionPhase::Resolving => assert_eq!(game.revealed().len(), 2),
        SessionPhase::Finished => {
            assert_eq!(game.matched().len(), game.deck().len());
            assert!(!game.winners().is_empty());
        }
        _ => {}
    }

    let total: u32 = game.players().iter().map(|p| p.score).sum();
    assert!(total as usize <= game.matched().len() / 2);
}

fn run_session(seed: u64, policy: BelowMinimumPolicy) {
    let mut rng = StdRng::seed_from_u64(seed);
    let config = MatchConfig {
        min_players: 2,
        max_players: 4,
        card_count: 8,
        below_minimum: policy,
    };
    let mut game = GameSession::new("soak", config, DeterministicRng::new(seed));
    let mut pending: Option<ResolveTicket> = None;
    let mut next_conn = 1u8;

    for _ in 0..400 {
        match rng.gen_range(0..100) {
            0..=9 => {
                let _ = game.join(conn(next_conn), format!("p{}", next_conn));
                next_conn = next_conn.wrapping_add(1).max(1);
            }
            10..=14 => {
                if let Some(&id) = game.turn_order().get(rng.gen_range(0..4)) {
                    game.remove_player(&id);
                }
            }
            15..=24 => {
                game.start();
            }
            25..=27 => {
                game.restart();
            }
            28..=44 => {
                if let Some(ticket) = pending.take() {
                    game.resolve(ticket).expect("engine refused a resolution");
                }
            }
            _ => {
                let actor = game
                    .turn_order()
                    .get(rng.gen_range(0..4))
                    .copied()
                    .unwrap_or(conn(0));
                let index = rng.gen_range(0..10);
                let expected_actor = game.current_player().map(|p| p.connection_id);

                if let Some(outcome) = game.flip(actor, index) {
                    assert_eq!(Some(actor), expected_actor, "flip accepted out of turn");
                    if let FlipOutcome::PairRevealed(_, ticket) = outcome {
                        pending = Some(ticket);
                    }
                }
            }
        }
        check_invariants(&game);
    }
}

#[test]
fn random_sessions_hold_invariants_under_pause() {
    for seed in 0..64 {
        run_session(seed, BelowMinimumPolicy::Pause);
    }
}

#[test]
fn random_sessions_hold_invariants_under_continue() {
    for seed in 1000..1064 {
        run_session(seed, BelowMinimumPolicy::Continue);
    }
}

#[test]
fn greedy_players_always_finish() {
    let mut rng = StdRng::seed_from_u64(7);

    for round in 0..32u64 {
        let mut game = GameSession::new("greedy", MatchConfig::default(), DeterministicRng::new(round));
        game.join(conn(1), "ann").unwrap();
        game.join(conn(2), "bob").unwrap();
        assert!(game.start());

        let mut steps = 0;
        while !game.is_finished() {
            steps += 1;
            assert!(steps < 10_000, "match did not terminate");

            let actor = game.current_player().unwrap().connection_id;
            let hidden: Vec<usize> = (0..game.deck().len())
                .filter(|&i| !game.matched().contains(&(i as u32)) && !game.revealed().contains(&(i as u32)))
                .collect();
            let pick = hidden[rng.gen_range(0..hidden.len())];

            if let Some(FlipOutcome::PairRevealed(_, ticket)) = game.flip(actor, pick) {
                game.resolve(ticket).unwrap();
            }
            check_invariants(&game);
        }

        let total: u32 = game.players().iter().map(|p| p.score).sum();
        assert_eq!(total as usize, game.deck().len() / 2);
    }
}
