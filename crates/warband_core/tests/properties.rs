//! Property-based tests for the combat invariants.

use proptest::prelude::*;

use warband_core::bridge::ProjectileSource;
use warband_core::math::cone_cos_squared;
use warband_core::melee::in_cone;
use warband_core::prelude::*;
use warband_core::request::Mailbox;
use warband_core::spatial::{AgentSnapshot, Snapshot, SpatialIndex};
use warband_core::targeting::acquire_with_hysteresis;
use warband_test_utils::determinism::strategies::{
    arb_agent_list, arb_direction, arb_half_angle,
};
use warband_test_utils::determinism::verify_parallel_matches_sequential;
use warband_test_utils::fixtures::{sample_tables, skirmish, Autopilot};

fn quarter(n: i32) -> Fixed {
    Fixed::from_num(n) / Fixed::from_num(4)
}

fn snapshot_agent(id: AgentId, faction: Faction, position: Vec2Fixed) -> AgentSnapshot {
    AgentSnapshot {
        id,
        position,
        facing: Vec2Fixed::FORWARD,
        faction,
        root: id,
        alive: true,
        targetable: true,
        health_fraction: Fixed::ONE,
    }
}

fn chain_tables(hops: u32) -> CombatTables {
    CombatTables::from_ron_str(&format!(
        r#"(spells: [SpellConfig(name: "arc", range: 40.0, cast_time_seconds: 0.0, cooldown_seconds: 999.0,
            acquire: ClosestEnemy,
            kind: Chain(payload: Payload(amount: 1, polarity: Harmful), hops: {hops}, radius: 8.0,
                hop_delay_seconds: 0.05, projectile_speed: 40.0))])"#
    ))
    .unwrap()
}

proptest! {
    /// A locked target is replaced iff the challenger is closer by at least
    /// the switch distance.
    #[test]
    fn prop_hysteresis_switch_rule(
        locked_q in 4i32..160,
        challenger_q in 4i32..160,
        min_switch_q in 1i32..40,
    ) {
        let seeker = snapshot_agent(1, Faction::Ally, Vec2Fixed::ZERO);
        let locked = snapshot_agent(2, Faction::Enemy, Vec2Fixed::new(quarter(locked_q), Fixed::ZERO));
        let challenger = snapshot_agent(3, Faction::Enemy, Vec2Fixed::new(Fixed::ZERO, quarter(challenger_q)));
        let snapshot = Snapshot::from_agents([seeker, locked, challenger]);
        let mut index = SpatialIndex::new(Fixed::from_num(4), 64);
        index.rebuild(&snapshot);

        let chosen = acquire_with_hysteresis(
            &snapshot,
            &index,
            &seeker,
            Some(2),
            Fixed::from_num(100),
            FactionMask::ENEMY,
            quarter(min_switch_q),
        );

        let should_switch = locked_q - challenger_q >= min_switch_q;
        prop_assert_eq!(chosen, Some(if should_switch { 3 } else { 2 }));
    }

    /// Targets dead ahead are inside every cone; targets behind never are.
    #[test]
    fn prop_cone_ahead_and_behind(forward in arb_direction(), half_angle in arb_half_angle(), reach in 1i32..20) {
        let cos_sq = cone_cos_squared(half_angle);
        let ahead = forward.scale(Fixed::from_num(reach));
        prop_assert!(in_cone(forward, ahead, cos_sq));
        prop_assert!(!in_cone(forward, -ahead, cos_sq));
        prop_assert!(!in_cone(forward, Vec2Fixed::ZERO, cos_sq));
    }

    /// The 45 degree diagonal is the cone edge and is excluded.
    #[test]
    fn prop_cone_edge_excluded(k in 1i32..50, flip in any::<bool>()) {
        let cos_sq = cone_cos_squared(Fixed::from_num(45));
        let side = if flip { -k } else { k };
        prop_assert!(!in_cone(Vec2Fixed::FORWARD, Vec2Fixed::from_num(side, k), cos_sq));
        prop_assert!(in_cone(Vec2Fixed::FORWARD, Vec2Fixed::from_num(side, k + 1), cos_sq));
    }

    /// A mailbox yields each write at most once.
    #[test]
    fn prop_request_idempotence(ops in proptest::collection::vec(any::<Option<u8>>(), 1..40)) {
        let mut mailbox = Mailbox::default();
        let mut model: Option<u8> = None;
        for op in ops {
            match op {
                Some(value) => {
                    mailbox.write(value);
                    model = Some(value);
                }
                None => {
                    prop_assert_eq!(mailbox.take(), model.take());
                    prop_assert!(!mailbox.is_pending());
                    prop_assert_eq!(mailbox.take(), None);
                }
            }
            prop_assert_eq!(mailbox.is_pending(), model.is_some());
        }
    }

    /// Cooldowns never move backwards, and a request rejected by the
    /// cooldown has no side effects.
    #[test]
    fn prop_cooldown_monotonic(pattern in proptest::collection::vec(any::<bool>(), 10..80), seed in any::<u64>()) {
        let tables = sample_tables();
        let sword = tables.weapon_id("sword").unwrap();
        let config = SimulationConfig::default().with_seed(seed).with_parallel(false);
        let mut sim = Simulation::new(config, tables).unwrap();
        let knight = sim
            .spawn_agent(AgentSpawnParams::new(Faction::Ally, Vec2Fixed::ZERO).with_health(100).with_weapon(sword))
            .unwrap();
        let dummy = sim
            .spawn_agent(AgentSpawnParams::new(Faction::Enemy, Vec2Fixed::from_num(0, 1)).with_health(100_000))
            .unwrap();
        sim.tick();

        let mut last = Fixed::ZERO;
        for attack in pattern {
            let before = sim.agent(knight).unwrap().weapon.unwrap();
            let ready = before.cooldown.is_ready(sim.now());
            let health_before = sim.agent(dummy).unwrap().health.unwrap().current;
            if attack {
                sim.request_attack(knight).unwrap();
            }
            sim.tick();

            let after = sim.agent(knight).unwrap().weapon.unwrap();
            prop_assert!(after.cooldown.next_allowed >= last);
            last = after.cooldown.next_allowed;

            if attack && !ready {
                prop_assert_eq!(after, before);
                prop_assert_eq!(sim.agent(dummy).unwrap().health.unwrap().current, health_before);
                prop_assert_eq!(sim.request_status(knight, Capability::Attack), Some(Outcome::Failure));
            }
        }
    }

    /// A chain created with N hops emits at most N hop requests and always
    /// tears down.
    #[test]
    fn prop_chain_terminates(hops in 1u32..7, enemies in arb_agent_list(12)) {
        let tables = chain_tables(hops);
        let arc = tables.spell_id("arc").unwrap();
        let mut sim = Simulation::new(SimulationConfig::default().with_parallel(false), tables).unwrap();
        let caster = sim
            .spawn_agent(AgentSpawnParams::new(Faction::Ally, Vec2Fixed::ZERO).with_spells([arc]))
            .unwrap();
        for enemy in &enemies {
            sim.spawn_agent(AgentSpawnParams::new(enemy.faction, enemy.position).with_health(enemy.health))
                .unwrap();
        }

        sim.request_cast_decision(caster, 0).unwrap();
        let mut emitted = 0u32;
        for _ in 0..200 {
            let events = sim.tick();
            emitted += events
                .bridge
                .projectiles
                .iter()
                .filter(|p| matches!(p.source, ProjectileSource::ChainHop { .. }))
                .count() as u32;
        }
        prop_assert!(emitted <= hops);
        prop_assert_eq!(sim.chains().count(), 0);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    /// Weapon and spell windups never overlap, and the published lock bits
    /// match the windup state.
    #[test]
    fn prop_single_windup_and_lock_bits(pattern in proptest::collection::vec(0u8..4, 20..120)) {
        let tables = sample_tables();
        let bow = tables.weapon_id("bow").unwrap();
        let spells = ["firebolt", "mend"].map(|name| tables.spell_id(name).unwrap());
        let mut sim = Simulation::new(SimulationConfig::default().with_parallel(false), tables).unwrap();
        let archer = sim
            .spawn_agent(
                AgentSpawnParams::new(Faction::Ally, Vec2Fixed::ZERO)
                    .with_health(100)
                    .with_weapon(bow)
                    .with_spells(spells),
            )
            .unwrap();
        sim.spawn_agent(AgentSpawnParams::new(Faction::Enemy, Vec2Fixed::from_num(0, 8)).with_health(100_000))
            .unwrap();

        for op in pattern {
            let _ = match op {
                0 => sim.request_attack(archer),
                1 => sim.request_cast_decision(archer, 0),
                2 => sim.request_cast_decision(archer, 1),
                _ => Ok(()),
            };
            let events = sim.tick();
            let agent = sim.agent(archer).unwrap();
            let weapon = agent.weapon.unwrap();
            let book = agent.spells.as_ref().unwrap();

            prop_assert!(!(weapon.windup.is_some() && book.windup.is_some()));
            let lock = events.bridge.lock_of(archer);
            prop_assert_eq!(lock.contains(MovementLock::ATTACKING), weapon.windup.is_some());
            prop_assert_eq!(lock.contains(MovementLock::CASTING), book.windup.is_some());
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(6))]

    /// Parallel and sequential read passes agree tick for tick.
    #[test]
    fn prop_parallel_matches_sequential(seed in any::<u64>(), per_side in 2u32..10) {
        let config = SimulationConfig::default().with_seed(seed);
        let divergence = verify_parallel_matches_sequential(&config, |c| skirmish(c, per_side), 150);
        prop_assert_eq!(divergence, None);
    }

    /// A bincode snapshot restores the exact state hash and keeps agreeing.
    #[test]
    fn prop_snapshot_roundtrip(seed in any::<u64>(), warmup in 0u64..120) {
        let mut sim = skirmish(SimulationConfig::default().with_seed(seed), 6);
        let mut pilot = Autopilot::new();
        pilot.run(&mut sim, warmup);

        let mut restored = Simulation::deserialize(&sim.serialize().unwrap()).unwrap();
        prop_assert_eq!(restored.state_hash(), sim.state_hash());

        let mut restored_pilot = pilot.clone();
        for _ in 0..60 {
            let a = pilot.step(&mut sim);
            let b = restored_pilot.step(&mut restored);
            prop_assert_eq!(a, b);
        }
        prop_assert_eq!(restored.state_hash(), sim.state_hash());
    }
}
