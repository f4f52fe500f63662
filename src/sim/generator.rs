//! Event generator: decides whether a tick produces an event, which one, who
//! is involved, and applies it to the match state.

use rand::distributions::{Distribution, WeightedIndex};
use rand::seq::SliceRandom;
use rand::Rng;
use tracing::warn;

use super::events::{ActorRef, EventKind, EventPayload, MatchEvent};
use super::roster::{Role, Side};
use super::state::{
    DragonType, KillRecord, Lane, MatchState, SetStatus, StateError, StructureTarget,
    StructureTier,
};
use super::table::{Candidate, CandidateTable};
use super::tuning::{
    respawn_seconds, Phase, BARON_BUFF_SWING, BARON_GOLD, COMEBACK_CAP, COMEBACK_PER_KILL,
    DEAD_PLAYER_SWING, DRAGON_GOLD, ELDER_BUFF_SWING, ELDER_GOLD, EXPECTED_KILLS_PER_MINUTE,
    FIRST_BLOOD_GOLD, HERALD_GOLD, INHIBITOR_GOLD, KILL_GOLD, KILL_PACE_GRACE_MINUTES,
    MAX_FIRE_PROBABILITY, MAX_WIN_CHANCE, MIN_WIN_CHANCE, NEXUS_KILL_CHANCE, NEXUS_TURRET_GOLD,
    TURRET_GOLD,
};

/// Aggregate power of both sides for the current tick
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SidePower {
    pub a: f64,
    pub b: f64,
}

impl SidePower {
    /// Roster power scaled by each side's tactics for the current phase
    pub fn compute(state: &MatchState) -> Self {
        let phase = Phase::from_clock(state.clock());
        let side_power = |side: Side| {
            let roster = state.roster(side);
            roster.total_power() * roster.tactics.multiplier(phase)
        };
        Self {
            a: side_power(Side::A),
            b: side_power(Side::B),
        }
    }

    pub fn of(&self, side: Side) -> f64 {
        match side {
            Side::A => self.a,
            Side::B => self.b,
        }
    }
}

/// Chance that anything happens this tick
pub fn fire_probability(state: &MatchState) -> f64 {
    let phase = Phase::from_clock(state.clock());
    let minutes = state.clock() as f64 / 60.0;
    let mut probability = phase.base_probability();

    if minutes >= KILL_PACE_GRACE_MINUTES {
        let expected = minutes * EXPECTED_KILLS_PER_MINUTE;
        let total = state.total_kills() as f64;
        if total < expected * 0.5 {
            probability *= 1.8;
        } else if total < expected * 0.8 {
            probability *= 1.5;
        } else if total > expected * 1.5 {
            probability *= 0.8;
        }
    }

    probability.min(MAX_FIRE_PROBABILITY)
}

/// Win-chance correction for side A from the kill score. Favors the side
/// behind and never exceeds the cap in either direction.
pub fn comeback_adjustment(kills_a: u32, kills_b: u32) -> f64 {
    let diff = kills_a as f64 - kills_b as f64;
    (-diff * COMEBACK_PER_KILL).clamp(-COMEBACK_CAP, COMEBACK_CAP)
}

/// Probability that side A wins the contested moment of this tick
pub fn win_chance(state: &MatchState, power: &SidePower) -> f64 {
    let total = power.a + power.b;
    let mut chance = if total > 0.0 { power.a / total } else { 0.5 };

    chance += comeback_adjustment(state.team(Side::A).kills, state.team(Side::B).kills);

    let dead_a = state.dead_count(Side::A) as f64;
    let dead_b = state.dead_count(Side::B) as f64;
    chance += DEAD_PLAYER_SWING * (dead_b - dead_a);

    let buffs = state.buffs();
    chance += buff_swing(buffs.baron_holder(), BARON_BUFF_SWING);
    chance += buff_swing(buffs.elder_holder(), ELDER_BUFF_SWING);

    chance.clamp(MIN_WIN_CHANCE, MAX_WIN_CHANCE)
}

fn buff_swing(holder: Option<Side>, swing: f64) -> f64 {
    match holder {
        Some(Side::A) => swing,
        Some(Side::B) => -swing,
        None => 0.0,
    }
}

/// Run the generator for one tick. Returns the fired event, already applied
/// to `state` and appended to its log.
pub fn generate<R: Rng + ?Sized>(
    state: &mut MatchState,
    power: &SidePower,
    rng: &mut R,
) -> Option<MatchEvent> {
    if state.status() != SetStatus::InProgress || state.fallen_nexus().is_some() {
        return None;
    }

    if !rng.gen_bool(fire_probability(state)) {
        return None;
    }

    let acting = if rng.gen_bool(win_chance(state, power)) {
        Side::A
    } else {
        Side::B
    };

    let table = CandidateTable::build(state, acting);
    if table.is_empty() {
        return None;
    }
    let candidate = table.pick(rng.gen_range(0..table.total_weight()))?;

    match resolve(state, candidate, acting, rng) {
        Ok(Some(event)) => match state.push_event(event.clone()) {
            Ok(()) => Some(event),
            Err(e) => {
                warn!(match_id = %state.match_id(), error = %e, "Could not log event");
                None
            }
        },
        Ok(None) => None,
        Err(e) => {
            warn!(
                match_id = %state.match_id(),
                candidate = ?candidate,
                error = %e,
                "Event candidate could not be applied"
            );
            None
        }
    }
}

/// Apply one drawn candidate for `acting`
pub(crate) fn resolve<R: Rng + ?Sized>(
    state: &mut MatchState,
    candidate: Candidate,
    acting: Side,
    rng: &mut R,
) -> Result<Option<MatchEvent>, StateError> {
    match candidate {
        Candidate::Combat(kind) => resolve_combat(state, kind, acting, rng),
        Candidate::Dragon => resolve_dragon(state, acting, rng).map(Some),
        Candidate::Herald => {
            let taker = objective_taker(state, acting, rng);
            state.take_herald(acting, HERALD_GOLD)?;
            let description = format!("{} secures the Rift Herald", credit(&taker, acting));
            Ok(Some(event(state, EventKind::Herald, description, acting, taker)))
        }
        Candidate::Baron => {
            let taker = objective_taker(state, acting, rng);
            state.take_baron(acting, BARON_GOLD)?;
            let description = format!("{} secures Baron Nashor", credit(&taker, acting));
            Ok(Some(event(state, EventKind::Baron, description, acting, taker)))
        }
        Candidate::Elder => {
            let taker = objective_taker(state, acting, rng);
            state.take_elder(acting, ELDER_GOLD)?;
            let description = format!("{} slays the Elder Dragon", credit(&taker, acting));
            Ok(Some(event(state, EventKind::ElderDragon, description, acting, taker)))
        }
        Candidate::Structure => resolve_structure(state, acting, rng),
    }
}

type Pool = Vec<(ActorRef, Role)>;

fn alive_pool(state: &MatchState, side: Side) -> Pool {
    state
        .alive_members(side)
        .into_iter()
        .map(|m| (m.actor_ref(side), m.role))
        .collect()
}

fn weighted_index<R: Rng + ?Sized>(pool: &Pool, rng: &mut R) -> Option<usize> {
    let dist = WeightedIndex::new(pool.iter().map(|(_, role)| role.combat_weight())).ok()?;
    Some(dist.sample(rng))
}

/// Remove and return a role-weighted pick
fn take_weighted<R: Rng + ?Sized>(pool: &mut Pool, rng: &mut R) -> Option<ActorRef> {
    let idx = weighted_index(pool, rng)?;
    Some(pool.swap_remove(idx).0)
}

/// Remove and return a uniform pick
fn take_uniform<R: Rng + ?Sized>(pool: &mut Pool, rng: &mut R) -> Option<ActorRef> {
    if pool.is_empty() {
        return None;
    }
    let idx = rng.gen_range(0..pool.len());
    Some(pool.swap_remove(idx).0)
}

fn take_role(pool: &mut Pool, role: Role) -> Option<ActorRef> {
    let idx = pool.iter().position(|(_, r)| *r == role)?;
    Some(pool.swap_remove(idx).0)
}

fn who(actor: &ActorRef) -> String {
    format!("{} ({})", actor.name, actor.side)
}

fn credit(taker: &Option<ActorRef>, side: Side) -> String {
    match taker {
        Some(actor) => who(actor),
        None => format!("Side {side}"),
    }
}

fn objective_taker<R: Rng + ?Sized>(
    state: &MatchState,
    side: Side,
    rng: &mut R,
) -> Option<ActorRef> {
    let mut pool = alive_pool(state, side);
    take_role(&mut pool, Role::Jungle).or_else(|| take_weighted(&mut pool, rng))
}

fn event(
    state: &MatchState,
    kind: EventKind,
    description: String,
    side: Side,
    actor: Option<ActorRef>,
) -> MatchEvent {
    let mut payload = EventPayload::for_side(side);
    payload.actors.extend(actor);
    MatchEvent {
        kind,
        time: state.clock(),
        set_number: state.set_number(),
        description,
        payload,
    }
}

fn kill(killer: &ActorRef, victim: &ActorRef, assists: &[ActorRef], bounty: u32) -> KillRecord {
    KillRecord {
        killer: killer.id,
        victim: victim.id,
        assists: assists.iter().map(|a| a.id).collect(),
        bounty,
    }
}

fn resolve_combat<R: Rng + ?Sized>(
    state: &mut MatchState,
    kind: EventKind,
    acting: Side,
    rng: &mut R,
) -> Result<Option<MatchEvent>, StateError> {
    let enemy = acting.opponent();
    let respawn = respawn_seconds(state.clock());
    let mut allies = alive_pool(state, acting);
    let mut enemies = alive_pool(state, enemy);
    if allies.is_empty() || enemies.is_empty() {
        return Ok(None);
    }

    let mut actors: Vec<ActorRef> = Vec::new();
    let mut victims: Vec<ActorRef> = Vec::new();
    let mut kills: Vec<KillRecord> = Vec::new();
    let mut trades: Vec<KillRecord> = Vec::new();

    let description = match kind {
        EventKind::Kill | EventKind::FirstBlood => {
            let (Some(killer), Some(victim)) =
                (take_weighted(&mut allies, rng), take_uniform(&mut enemies, rng))
            else {
                return Ok(None);
            };
            let max_assists = if kind == EventKind::FirstBlood { 1 } else { 2 };
            let count = rng.gen_range(0..=max_assists).min(allies.len());
            let assists: Vec<ActorRef> = (0..count)
                .filter_map(|_| take_weighted(&mut allies, rng))
                .collect();
            let bounty = if kind == EventKind::FirstBlood {
                FIRST_BLOOD_GOLD
            } else {
                KILL_GOLD
            };
            kills.push(kill(&killer, &victim, &assists, bounty));

            let description = if kind == EventKind::FirstBlood {
                format!("First Blood! {} takes down {}", who(&killer), who(&victim))
            } else {
                format!("{} slays {}", who(&killer), who(&victim))
            };
            actors.push(killer);
            actors.extend(assists);
            victims.push(victim);
            description
        }
        EventKind::Gank => {
            let Some(killer) =
                take_role(&mut allies, Role::Jungle).or_else(|| take_weighted(&mut allies, rng))
            else {
                return Ok(None);
            };
            let Some(victim) = take_uniform(&mut enemies, rng) else {
                return Ok(None);
            };
            let assists: Vec<ActorRef> = take_weighted(&mut allies, rng).into_iter().collect();
            kills.push(kill(&killer, &victim, &assists, KILL_GOLD));

            let description = format!("{} ganks and catches {}", who(&killer), who(&victim));
            actors.push(killer);
            actors.extend(assists);
            victims.push(victim);
            description
        }
        EventKind::Skirmish => {
            let fighters = rng.gen_range(2..=3).min(allies.len());
            let mut participants: Pool = Vec::with_capacity(fighters);
            for _ in 0..fighters {
                let Some(idx) = weighted_index(&allies, rng) else {
                    break;
                };
                participants.push(allies.swap_remove(idx));
            }
            let fallen = rng.gen_range(1..=2).min(enemies.len());
            for _ in 0..fallen {
                let Some(victim) = take_uniform(&mut enemies, rng) else {
                    break;
                };
                let mut shooters = participants.clone();
                let Some(killer) = take_weighted(&mut shooters, rng) else {
                    break;
                };
                let assists: Vec<ActorRef> = shooters.into_iter().map(|(a, _)| a).collect();
                kills.push(kill(&killer, &victim, &assists, KILL_GOLD));
                victims.push(victim);
            }

            let description = format!(
                "Side {} wins a skirmish, {} down for side {}",
                acting,
                victims.len(),
                enemy
            );
            actors = participants.into_iter().map(|(a, _)| a).collect();
            description
        }
        EventKind::Teamfight => {
            // The losing side may trade one kill before the fight collapses
            if allies.len() > 1 && rng.gen_bool(0.5) {
                let mut avengers = enemies.clone();
                if let (Some(fallen), Some(avenger)) =
                    (take_uniform(&mut allies, rng), take_weighted(&mut avengers, rng))
                {
                    trades.push(kill(&avenger, &fallen, &[], KILL_GOLD));
                    victims.push(fallen);
                }
            }

            let fallen = rng.gen_range(2..=4).min(enemies.len());
            let participants: Vec<ActorRef> = allies.iter().map(|(a, _)| a.clone()).collect();
            for _ in 0..fallen {
                let Some(victim) = take_uniform(&mut enemies, rng) else {
                    break;
                };
                let mut shooters = allies.clone();
                let Some(killer) = take_weighted(&mut shooters, rng) else {
                    break;
                };
                let assists: Vec<ActorRef> = shooters.into_iter().map(|(a, _)| a).collect();
                kills.push(kill(&killer, &victim, &assists, KILL_GOLD));
                victims.push(victim);
            }

            let description = format!(
                "Side {} wins a teamfight {} for {}",
                acting,
                kills.len(),
                trades.len()
            );
            actors = participants;
            description
        }
        _ => return Ok(None),
    };

    if kills.is_empty() {
        return Ok(None);
    }

    state.record_kills(enemy, &trades, respawn)?;
    state.record_kills(acting, &kills, respawn)?;

    let mut payload = EventPayload::for_side(acting);
    payload.actors = actors;
    payload.victims = victims;
    Ok(Some(MatchEvent {
        kind,
        time: state.clock(),
        set_number: state.set_number(),
        description,
        payload,
    }))
}

fn resolve_dragon<R: Rng + ?Sized>(
    state: &mut MatchState,
    acting: Side,
    rng: &mut R,
) -> Result<MatchEvent, StateError> {
    let dragon = DragonType::ALL
        .choose(rng)
        .copied()
        .unwrap_or(DragonType::Infernal);
    let taker = objective_taker(state, acting, rng);
    let soul = state.take_dragon(acting, dragon, DRAGON_GOLD)?;

    let (kind, description) = if soul {
        (
            EventKind::DragonSoul,
            format!(
                "{} claims the {} Dragon Soul, the Elder Dragon awakens",
                credit(&taker, acting),
                dragon.label()
            ),
        )
    } else {
        (
            EventKind::Dragon,
            format!("{} slays the {} Drake", credit(&taker, acting), dragon.label()),
        )
    };

    let mut event = event(state, kind, description, acting, taker);
    event.payload.dragon = Some(dragon);
    Ok(event)
}

fn lane_label(lane: Lane) -> &'static str {
    match lane {
        Lane::Top => "top",
        Lane::Mid => "mid",
        Lane::Bot => "bot",
    }
}

fn resolve_structure<R: Rng + ?Sized>(
    state: &mut MatchState,
    acting: Side,
    rng: &mut R,
) -> Result<Option<MatchEvent>, StateError> {
    let enemy = acting.opponent();
    let targets = state.team(enemy).structures.attackable();
    let Some(target) = targets.choose(rng).copied() else {
        return Ok(None);
    };

    if target.tier == StructureTier::Core && !rng.gen_bool(NEXUS_KILL_CHANCE) {
        return Ok(None);
    }

    let (kind, gold, description) = describe_structure(target, acting);
    state.destroy_structure(acting, target, gold)?;

    let mut payload = EventPayload::for_side(acting);
    payload.lane = target.lane;
    payload.tier = Some(target.tier);
    Ok(Some(MatchEvent {
        kind,
        time: state.clock(),
        set_number: state.set_number(),
        description,
        payload,
    }))
}

fn describe_structure(target: StructureTarget, acting: Side) -> (EventKind, u32, String) {
    let enemy = acting.opponent();
    let lane = target.lane.map(lane_label).unwrap_or("base");
    match target.tier {
        StructureTier::Tier1 | StructureTier::Tier2 | StructureTier::Tier3 => {
            let tier = match target.tier {
                StructureTier::Tier1 => 1,
                StructureTier::Tier2 => 2,
                _ => 3,
            };
            (
                EventKind::Turret,
                TURRET_GOLD,
                format!("Side {acting} destroys side {enemy}'s {lane} tier {tier} turret"),
            )
        }
        StructureTier::Inhibitor => (
            EventKind::Inhibitor,
            INHIBITOR_GOLD,
            format!("Side {acting} destroys side {enemy}'s {lane} inhibitor"),
        ),
        StructureTier::TwinTurretA | StructureTier::TwinTurretB => (
            EventKind::NexusTurret,
            NEXUS_TURRET_GOLD,
            format!("Side {acting} destroys one of side {enemy}'s nexus turrets"),
        ),
        StructureTier::Core => (
            EventKind::NexusDestroyed,
            0,
            format!("Side {acting} destroys side {enemy}'s nexus"),
        ),
    }
}
