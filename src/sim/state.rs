//! Authoritative state of one running match
//!
//! Fields are private; the tick pipeline mutates a match only through the
//! transition methods below so the structural and set-progression invariants
//! hold at every call site.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::events::{ActorRef, MatchEvent};
use super::roster::{MatchCategory, Role, Roster, Side};
use super::tuning::{
    ASSIST_GOLD, BARON_FIRST_SPAWN, BARON_RESPAWN, BUFF_DURATION, DRAGONS_FOR_SOUL,
    DRAGON_FIRST_SPAWN, DRAGON_RESPAWN, ELDER_RESPAWN, HERALD_DESPAWN, HERALD_SPAWN,
    PASSIVE_GOLD_PER_SECOND, STARTING_GOLD_PER_MEMBER,
};

/// Map lane
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lane {
    Top,
    Mid,
    Bot,
}

impl Lane {
    pub const ALL: [Lane; 3] = [Lane::Top, Lane::Mid, Lane::Bot];
}

/// Individual structure within a lane or the nexus
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StructureTier {
    Tier1,
    Tier2,
    Tier3,
    Inhibitor,
    TwinTurretA,
    TwinTurretB,
    Core,
}

/// A structure that can be targeted by the attacking side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructureTarget {
    pub lane: Option<Lane>,
    pub tier: StructureTier,
}

/// Standing flags for one lane (true = standing)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaneStructures {
    pub tier1: bool,
    pub tier2: bool,
    pub tier3: bool,
    pub inhibitor: bool,
}

impl LaneStructures {
    fn standing() -> Self {
        Self {
            tier1: true,
            tier2: true,
            tier3: true,
            inhibitor: true,
        }
    }

    /// Next structure an attacker has to take in this lane
    pub fn next_target(&self) -> Option<StructureTier> {
        if self.tier1 {
            Some(StructureTier::Tier1)
        } else if self.tier2 {
            Some(StructureTier::Tier2)
        } else if self.tier3 {
            Some(StructureTier::Tier3)
        } else if self.inhibitor {
            Some(StructureTier::Inhibitor)
        } else {
            None
        }
    }

    fn destroyed_count(&self) -> u32 {
        [self.tier1, self.tier2, self.tier3, self.inhibitor]
            .iter()
            .filter(|standing| !**standing)
            .count() as u32
    }
}

/// Standing flags for the nexus (true = standing)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NexusStructures {
    pub twin_turret_a: bool,
    pub twin_turret_b: bool,
    pub core: bool,
}

/// All structures a side defends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructureState {
    pub top: LaneStructures,
    pub mid: LaneStructures,
    pub bot: LaneStructures,
    pub nexus: NexusStructures,
}

impl StructureState {
    pub fn standing() -> Self {
        Self {
            top: LaneStructures::standing(),
            mid: LaneStructures::standing(),
            bot: LaneStructures::standing(),
            nexus: NexusStructures {
                twin_turret_a: true,
                twin_turret_b: true,
                core: true,
            },
        }
    }

    pub fn lane(&self, lane: Lane) -> &LaneStructures {
        match lane {
            Lane::Top => &self.top,
            Lane::Mid => &self.mid,
            Lane::Bot => &self.bot,
        }
    }

    fn lane_mut(&mut self, lane: Lane) -> &mut LaneStructures {
        match lane {
            Lane::Top => &mut self.top,
            Lane::Mid => &mut self.mid,
            Lane::Bot => &mut self.bot,
        }
    }

    pub fn all_inhibitors_down(&self) -> bool {
        Lane::ALL.iter().all(|lane| !self.lane(*lane).inhibitor)
    }

    pub fn twin_turrets_down(&self) -> bool {
        !self.nexus.twin_turret_a && !self.nexus.twin_turret_b
    }

    /// Structures that may be attacked right now.
    ///
    /// Lanes expose their next standing tier. The twin turrets open up only
    /// once every inhibitor is down, the core only once both twins are down.
    pub fn attackable(&self) -> Vec<StructureTarget> {
        let lanes: Vec<StructureTarget> = Lane::ALL
            .iter()
            .filter_map(|lane| {
                self.lane(*lane).next_target().map(|tier| StructureTarget {
                    lane: Some(*lane),
                    tier,
                })
            })
            .collect();

        if !lanes.is_empty() || !self.all_inhibitors_down() {
            return lanes;
        }

        let mut nexus = Vec::new();
        if self.nexus.twin_turret_a {
            nexus.push(StructureTarget {
                lane: None,
                tier: StructureTier::TwinTurretA,
            });
        }
        if self.nexus.twin_turret_b {
            nexus.push(StructureTarget {
                lane: None,
                tier: StructureTier::TwinTurretB,
            });
        }
        if nexus.is_empty() && self.twin_turrets_down() && self.nexus.core {
            nexus.push(StructureTarget {
                lane: None,
                tier: StructureTier::Core,
            });
        }
        nexus
    }

    pub fn is_attackable(&self, target: StructureTarget) -> bool {
        self.attackable().contains(&target)
    }

    fn knock_down(&mut self, target: StructureTarget) -> Result<(), StateError> {
        if !self.is_attackable(target) {
            return Err(StateError::StructureGated(target.tier));
        }
        match (target.lane, target.tier) {
            (Some(lane), tier) => {
                let lane = self.lane_mut(lane);
                match tier {
                    StructureTier::Tier1 => lane.tier1 = false,
                    StructureTier::Tier2 => lane.tier2 = false,
                    StructureTier::Tier3 => lane.tier3 = false,
                    StructureTier::Inhibitor => lane.inhibitor = false,
                    other => return Err(StateError::StructureGated(other)),
                }
            }
            (None, StructureTier::TwinTurretA) => self.nexus.twin_turret_a = false,
            (None, StructureTier::TwinTurretB) => self.nexus.twin_turret_b = false,
            (None, StructureTier::Core) => self.nexus.core = false,
            (None, other) => return Err(StateError::StructureGated(other)),
        }
        Ok(())
    }

    pub fn destroyed_count(&self) -> u32 {
        let lanes: u32 = Lane::ALL
            .iter()
            .map(|lane| self.lane(*lane).destroyed_count())
            .sum();
        let nexus = [
            self.nexus.twin_turret_a,
            self.nexus.twin_turret_b,
            self.nexus.core,
        ]
        .iter()
        .filter(|standing| !**standing)
        .count() as u32;
        lanes + nexus
    }
}

/// Elemental dragon variants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DragonType {
    Infernal,
    Mountain,
    Ocean,
    Cloud,
    Hextech,
    Chemtech,
}

impl DragonType {
    pub const ALL: [DragonType; 6] = [
        DragonType::Infernal,
        DragonType::Mountain,
        DragonType::Ocean,
        DragonType::Cloud,
        DragonType::Hextech,
        DragonType::Chemtech,
    ];

    pub fn label(self) -> &'static str {
        match self {
            DragonType::Infernal => "Infernal",
            DragonType::Mountain => "Mountain",
            DragonType::Ocean => "Ocean",
            DragonType::Cloud => "Cloud",
            DragonType::Hextech => "Hextech",
            DragonType::Chemtech => "Chemtech",
        }
    }
}

/// Live stats of one member for the current set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberState {
    pub id: Uuid,
    pub name: String,
    pub role: Role,
    pub power: f64,
    pub kills: u32,
    pub deaths: u32,
    pub assists: u32,
    pub gold: u32,
}

impl MemberState {
    pub fn actor_ref(&self, side: Side) -> ActorRef {
        ActorRef {
            id: self.id,
            name: self.name.clone(),
            side,
        }
    }
}

/// Per-side, per-set state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamState {
    pub team_id: Uuid,
    pub members: Vec<MemberState>,
    pub kills: u32,
    pub gold: u32,
    pub dragons: Vec<DragonType>,
    pub barons: u32,
    pub heralds: u32,
    /// A taken herald not yet spent on a structure
    pub herald_charge: bool,
    pub structures: StructureState,
}

impl TeamState {
    pub fn new(roster: &Roster) -> Self {
        let members: Vec<MemberState> = roster
            .members
            .iter()
            .map(|m| MemberState {
                id: m.id,
                name: m.name.clone(),
                role: m.role,
                power: m.power,
                kills: 0,
                deaths: 0,
                assists: 0,
                gold: STARTING_GOLD_PER_MEMBER,
            })
            .collect();
        let gold = STARTING_GOLD_PER_MEMBER * members.len() as u32;

        Self {
            team_id: roster.team_id,
            members,
            kills: 0,
            gold,
            dragons: Vec::new(),
            barons: 0,
            heralds: 0,
            herald_charge: false,
            structures: StructureState::standing(),
        }
    }

    pub fn member(&self, id: Uuid) -> Option<&MemberState> {
        self.members.iter().find(|m| m.id == id)
    }

    fn member_mut(&mut self, id: Uuid) -> Option<&mut MemberState> {
        self.members.iter_mut().find(|m| m.id == id)
    }

    pub fn has_soul(&self) -> bool {
        self.dragons.len() >= DRAGONS_FOR_SOUL
    }

    /// Split team gold evenly, remainder to the first members
    fn share_gold(&mut self, amount: u32) {
        self.gold += amount;
        let count = self.members.len() as u32;
        if count == 0 {
            return;
        }
        let share = amount / count;
        let remainder = amount % count;
        for (i, member) in self.members.iter_mut().enumerate() {
            member.gold += share + u32::from((i as u32) < remainder);
        }
    }
}

/// Neutral objective timers and flags for the current set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectiveState {
    pub dragon_alive: bool,
    pub dragon_respawn_at: u32,
    pub baron_alive: bool,
    pub baron_respawn_at: u32,
    pub herald_alive: bool,
    pub herald_taken: bool,
    /// Set once either side holds the dragon soul; the pit spawns elders only
    pub elder_available: bool,
    pub elder_alive: bool,
    pub elder_respawn_at: u32,
}

impl ObjectiveState {
    fn new() -> Self {
        Self {
            dragon_alive: false,
            dragon_respawn_at: DRAGON_FIRST_SPAWN,
            baron_alive: false,
            baron_respawn_at: BARON_FIRST_SPAWN,
            herald_alive: false,
            herald_taken: false,
            elder_available: false,
            elder_alive: false,
            elder_respawn_at: 0,
        }
    }

    fn refresh(&mut self, clock: u32) {
        if !self.elder_available && !self.dragon_alive && clock >= self.dragon_respawn_at {
            self.dragon_alive = true;
        }
        if !self.baron_alive && clock >= self.baron_respawn_at {
            self.baron_alive = true;
        }
        self.herald_alive = !self.herald_taken && (HERALD_SPAWN..HERALD_DESPAWN).contains(&clock);
        if self.elder_available && !self.elder_alive && clock >= self.elder_respawn_at {
            self.elder_alive = true;
        }
    }
}

/// Holder of a timed buff
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveBuff {
    pub side: Side,
    pub expires_at: u32,
}

/// Active team-wide buffs; each type has at most one holder
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Buffs {
    pub baron: Option<ActiveBuff>,
    pub elder: Option<ActiveBuff>,
}

impl Buffs {
    fn expire(&mut self, clock: u32) {
        if self.baron.is_some_and(|b| clock >= b.expires_at) {
            self.baron = None;
        }
        if self.elder.is_some_and(|b| clock >= b.expires_at) {
            self.elder = None;
        }
    }

    pub fn baron_holder(&self) -> Option<Side> {
        self.baron.map(|b| b.side)
    }

    pub fn elder_holder(&self) -> Option<Side> {
        self.elder.map(|b| b.side)
    }

    pub fn holds_any(&self, side: Side) -> bool {
        self.baron_holder() == Some(side) || self.elder_holder() == Some(side)
    }
}

/// A slain actor waiting to come back
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RespawnEntry {
    pub actor_id: Uuid,
    pub name: String,
    pub side: Side,
    pub respawn_at: u32,
}

/// Actors currently out of play
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RespawnQueue {
    entries: Vec<RespawnEntry>,
}

impl RespawnQueue {
    pub fn is_dead(&self, actor_id: Uuid, clock: u32) -> bool {
        self.entries
            .iter()
            .any(|e| e.actor_id == actor_id && e.respawn_at > clock)
    }

    pub fn dead_count(&self, side: Side, clock: u32) -> usize {
        self.entries
            .iter()
            .filter(|e| e.side == side && e.respawn_at > clock)
            .count()
    }

    pub fn dead_ids(&self, clock: u32) -> Vec<Uuid> {
        self.entries
            .iter()
            .filter(|e| e.respawn_at > clock)
            .map(|e| e.actor_id)
            .collect()
    }

    pub fn entries(&self) -> &[RespawnEntry] {
        &self.entries
    }

    fn push(&mut self, entry: RespawnEntry) {
        self.entries.retain(|e| e.actor_id != entry.actor_id);
        self.entries.push(entry);
    }

    fn prune(&mut self, clock: u32) {
        self.entries.retain(|e| e.respawn_at > clock);
    }
}

/// Set progression status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SetStatus {
    InProgress,
    SetOver,
    MatchOver,
}

/// What ended a set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecidedBy {
    Nexus,
    TimeLimit,
}

/// Result of a finished set, carrying its event log out of the live state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetResult {
    pub set_number: u8,
    pub winner: Side,
    pub decided_by: DecidedBy,
    pub duration: u32,
    pub set_wins: [u8; 2],
    pub match_over: bool,
    pub events: Vec<MatchEvent>,
}

/// One completed set, kept for the scoreline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetSummary {
    pub set_number: u8,
    pub winner: Side,
    pub decided_by: DecidedBy,
    pub duration: u32,
}

/// Kill credited by the generator
#[derive(Debug, Clone)]
pub struct KillRecord {
    pub killer: Uuid,
    pub victim: Uuid,
    pub assists: Vec<Uuid>,
    pub bounty: u32,
}

/// Errors for transitions requested in a state that forbids them
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StateError {
    #[error("Set is not in progress")]
    NotInProgress,

    #[error("No set is waiting to be replaced")]
    NoFinishedSet,

    #[error("Match is already over")]
    MatchOver,

    #[error("{0} is not available")]
    ObjectiveUnavailable(&'static str),

    #[error("Structure {0:?} is not attackable yet")]
    StructureGated(StructureTier),

    #[error("Unknown or dead actor {0}")]
    InvalidActor(Uuid),
}

/// Authoritative, serializable snapshot of one running match
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchState {
    match_id: Uuid,
    category: MatchCategory,
    rosters: [Roster; 2],
    clock: u32,
    set_number: u8,
    set_wins: [u8; 2],
    max_sets: u8,
    sets_to_win: u8,
    set_budget: u32,
    teams: [TeamState; 2],
    objectives: ObjectiveState,
    buffs: Buffs,
    respawns: RespawnQueue,
    log: Vec<MatchEvent>,
    status: SetStatus,
    winning_side: Option<Side>,
    history: Vec<SetSummary>,
}

impl MatchState {
    /// Fresh match at the start of set one
    pub fn new(
        match_id: Uuid,
        category: MatchCategory,
        side_a: Roster,
        side_b: Roster,
        set_budget: u32,
    ) -> Self {
        let (max_sets, sets_to_win) = category.format();
        let teams = [TeamState::new(&side_a), TeamState::new(&side_b)];

        Self {
            match_id,
            category,
            rosters: [side_a, side_b],
            clock: 0,
            set_number: 1,
            set_wins: [0, 0],
            max_sets,
            sets_to_win,
            set_budget,
            teams,
            objectives: ObjectiveState::new(),
            buffs: Buffs::default(),
            respawns: RespawnQueue::default(),
            log: Vec::new(),
            status: SetStatus::InProgress,
            winning_side: None,
            history: Vec::new(),
        }
    }

    // ------------------------------------------------------------------
    // Readers
    // ------------------------------------------------------------------

    pub fn match_id(&self) -> Uuid {
        self.match_id
    }

    pub fn category(&self) -> MatchCategory {
        self.category
    }

    pub fn roster(&self, side: Side) -> &Roster {
        &self.rosters[side.index()]
    }

    pub fn clock(&self) -> u32 {
        self.clock
    }

    pub fn set_number(&self) -> u8 {
        self.set_number
    }

    pub fn set_wins(&self) -> [u8; 2] {
        self.set_wins
    }

    pub fn max_sets(&self) -> u8 {
        self.max_sets
    }

    pub fn sets_to_win(&self) -> u8 {
        self.sets_to_win
    }

    pub fn set_budget(&self) -> u32 {
        self.set_budget
    }

    pub fn team(&self, side: Side) -> &TeamState {
        &self.teams[side.index()]
    }

    pub fn objectives(&self) -> &ObjectiveState {
        &self.objectives
    }

    pub fn buffs(&self) -> &Buffs {
        &self.buffs
    }

    pub fn respawns(&self) -> &RespawnQueue {
        &self.respawns
    }

    pub fn log(&self) -> &[MatchEvent] {
        &self.log
    }

    pub fn status(&self) -> SetStatus {
        self.status
    }

    pub fn winning_side(&self) -> Option<Side> {
        self.winning_side
    }

    pub fn history(&self) -> &[SetSummary] {
        &self.history
    }

    pub fn is_match_over(&self) -> bool {
        self.status == SetStatus::MatchOver
    }

    pub fn total_kills(&self) -> u32 {
        self.teams[0].kills + self.teams[1].kills
    }

    pub fn is_alive(&self, actor_id: Uuid) -> bool {
        !self.respawns.is_dead(actor_id, self.clock)
    }

    pub fn dead_count(&self, side: Side) -> usize {
        self.respawns.dead_count(side, self.clock)
    }

    pub fn alive_members(&self, side: Side) -> Vec<&MemberState> {
        self.team(side)
            .members
            .iter()
            .filter(|m| self.is_alive(m.id))
            .collect()
    }

    pub fn budget_exhausted(&self) -> bool {
        self.clock >= self.set_budget
    }

    /// Side ahead on sets, `None` when level
    pub fn set_leader(&self) -> Option<Side> {
        match self.set_wins[0].cmp(&self.set_wins[1]) {
            std::cmp::Ordering::Greater => Some(Side::A),
            std::cmp::Ordering::Less => Some(Side::B),
            std::cmp::Ordering::Equal => None,
        }
    }

    // ------------------------------------------------------------------
    // Transitions
    // ------------------------------------------------------------------

    fn ensure_in_progress(&self) -> Result<(), StateError> {
        if self.status == SetStatus::InProgress {
            Ok(())
        } else {
            Err(StateError::NotInProgress)
        }
    }

    /// Move the set clock forward, paying passive income and refreshing
    /// objective spawns and buff expiry.
    pub fn advance_clock(&mut self, secs: u32) -> Result<(), StateError> {
        self.ensure_in_progress()?;
        self.clock = self.clock.saturating_add(secs);

        let income = secs * PASSIVE_GOLD_PER_SECOND;
        for team in self.teams.iter_mut() {
            team.gold += income * team.members.len() as u32;
            for member in team.members.iter_mut() {
                member.gold += income;
            }
        }

        self.objectives.refresh(self.clock);
        self.buffs.expire(self.clock);
        Ok(())
    }

    /// Drop respawn entries whose timer has elapsed
    pub fn prune_respawns(&mut self) {
        self.respawns.prune(self.clock);
    }

    /// Credit kills to `side`. Every victim must belong to the other side and
    /// still be alive; each is queued for respawn.
    pub fn record_kills(
        &mut self,
        side: Side,
        kills: &[KillRecord],
        respawn_secs: u32,
    ) -> Result<(), StateError> {
        self.ensure_in_progress()?;
        let enemy = side.opponent();

        for kill in kills {
            if self.team(side).member(kill.killer).is_none() || !self.is_alive(kill.killer) {
                return Err(StateError::InvalidActor(kill.killer));
            }
            if self.team(enemy).member(kill.victim).is_none() || !self.is_alive(kill.victim) {
                return Err(StateError::InvalidActor(kill.victim));
            }
        }

        for kill in kills {
            let team = &mut self.teams[side.index()];
            team.kills += 1;
            team.gold += kill.bounty;
            if let Some(killer) = team.member_mut(kill.killer) {
                killer.kills += 1;
                killer.gold += kill.bounty;
            }
            if !kill.assists.is_empty() {
                let share = ASSIST_GOLD / kill.assists.len() as u32;
                for assist in &kill.assists {
                    if let Some(member) = team.member_mut(*assist) {
                        member.assists += 1;
                        member.gold += share;
                        team.gold += share;
                    }
                }
            }

            let victim_team = &mut self.teams[enemy.index()];
            let name = match victim_team.member_mut(kill.victim) {
                Some(victim) => {
                    victim.deaths += 1;
                    victim.name.clone()
                }
                None => return Err(StateError::InvalidActor(kill.victim)),
            };
            self.respawns.push(RespawnEntry {
                actor_id: kill.victim,
                name,
                side: enemy,
                respawn_at: self.clock + respawn_secs,
            });
        }
        Ok(())
    }

    /// Whether the plain dragon can be contested this tick
    pub fn dragon_up(&self) -> bool {
        self.objectives.dragon_alive
            && !self.objectives.elder_available
            && !self.teams.iter().any(|t| t.has_soul())
    }

    /// Take the dragon. Returns true when this capture completed the soul.
    pub fn take_dragon(
        &mut self,
        side: Side,
        dragon: DragonType,
        gold: u32,
    ) -> Result<bool, StateError> {
        self.ensure_in_progress()?;
        if !self.dragon_up() {
            return Err(StateError::ObjectiveUnavailable("Dragon"));
        }

        let team = &mut self.teams[side.index()];
        team.dragons.push(dragon);
        team.share_gold(gold);
        let soul = team.has_soul();

        self.objectives.dragon_alive = false;
        if soul {
            self.objectives.elder_available = true;
            self.objectives.elder_alive = false;
            self.objectives.elder_respawn_at = self.clock + DRAGON_RESPAWN;
        } else {
            self.objectives.dragon_respawn_at = self.clock + DRAGON_RESPAWN;
        }
        Ok(soul)
    }

    pub fn take_herald(&mut self, side: Side, gold: u32) -> Result<(), StateError> {
        self.ensure_in_progress()?;
        if !self.objectives.herald_alive || self.objectives.herald_taken {
            return Err(StateError::ObjectiveUnavailable("Rift Herald"));
        }
        self.objectives.herald_alive = false;
        self.objectives.herald_taken = true;

        let team = &mut self.teams[side.index()];
        team.heralds += 1;
        team.herald_charge = true;
        team.share_gold(gold);
        Ok(())
    }

    pub fn take_baron(&mut self, side: Side, gold: u32) -> Result<(), StateError> {
        self.ensure_in_progress()?;
        if !self.objectives.baron_alive {
            return Err(StateError::ObjectiveUnavailable("Baron"));
        }
        self.objectives.baron_alive = false;
        self.objectives.baron_respawn_at = self.clock + BARON_RESPAWN;
        self.buffs.baron = Some(ActiveBuff {
            side,
            expires_at: self.clock + BUFF_DURATION,
        });

        let team = &mut self.teams[side.index()];
        team.barons += 1;
        team.share_gold(gold);
        Ok(())
    }

    pub fn take_elder(&mut self, side: Side, gold: u32) -> Result<(), StateError> {
        self.ensure_in_progress()?;
        if !self.objectives.elder_available || !self.objectives.elder_alive {
            return Err(StateError::ObjectiveUnavailable("Elder Dragon"));
        }
        self.objectives.elder_alive = false;
        self.objectives.elder_respawn_at = self.clock + ELDER_RESPAWN;
        self.buffs.elder = Some(ActiveBuff {
            side,
            expires_at: self.clock + BUFF_DURATION,
        });
        self.teams[side.index()].share_gold(gold);
        Ok(())
    }

    /// `attacker` knocks down one of the opponent's structures. Gated targets
    /// are refused. A standing herald charge is spent on lane structures.
    pub fn destroy_structure(
        &mut self,
        attacker: Side,
        target: StructureTarget,
        gold: u32,
    ) -> Result<(), StateError> {
        self.ensure_in_progress()?;
        let defender = attacker.opponent();
        self.teams[defender.index()].structures.knock_down(target)?;

        let team = &mut self.teams[attacker.index()];
        team.share_gold(gold);
        if target.lane.is_some() {
            team.herald_charge = false;
        }
        Ok(())
    }

    /// Append a fired event to the current set's log
    pub fn push_event(&mut self, event: MatchEvent) -> Result<(), StateError> {
        self.ensure_in_progress()?;
        self.log.push(event);
        Ok(())
    }

    /// Side whose nexus core has fallen, if any
    pub fn fallen_nexus(&self) -> Option<Side> {
        Side::BOTH
            .into_iter()
            .find(|side| !self.team(*side).structures.nexus.core)
    }

    /// Close the current set in favour of `winner`. Moves the event log into
    /// the returned result. Reaching `sets_to_win` ends the match.
    pub fn finish_set(
        &mut self,
        winner: Side,
        decided_by: DecidedBy,
    ) -> Result<SetResult, StateError> {
        self.ensure_in_progress()?;

        let wins = &mut self.set_wins[winner.index()];
        *wins = (*wins + 1).min(self.sets_to_win);
        let match_over = *wins >= self.sets_to_win;

        self.status = if match_over {
            SetStatus::MatchOver
        } else {
            SetStatus::SetOver
        };
        self.winning_side = Some(winner);

        self.history.push(SetSummary {
            set_number: self.set_number,
            winner,
            decided_by,
            duration: self.clock,
        });

        Ok(SetResult {
            set_number: self.set_number,
            winner,
            decided_by,
            duration: self.clock,
            set_wins: self.set_wins,
            match_over,
            events: std::mem::take(&mut self.log),
        })
    }

    /// Reset per-set state for the next set. Set wins and history persist.
    pub fn start_next_set(&mut self, set_budget: u32) -> Result<(), StateError> {
        match self.status {
            SetStatus::SetOver => {}
            SetStatus::MatchOver => return Err(StateError::MatchOver),
            SetStatus::InProgress => return Err(StateError::NoFinishedSet),
        }

        self.set_number += 1;
        self.clock = 0;
        self.set_budget = set_budget;
        self.teams = [
            TeamState::new(&self.rosters[0]),
            TeamState::new(&self.rosters[1]),
        ];
        self.objectives = ObjectiveState::new();
        self.buffs = Buffs::default();
        self.respawns = RespawnQueue::default();
        self.log.clear();
        self.status = SetStatus::InProgress;
        self.winning_side = None;
        Ok(())
    }

    /// End the match immediately with the current scoreline
    pub fn conclude(&mut self) -> Result<Option<Side>, StateError> {
        if self.status == SetStatus::MatchOver {
            return Err(StateError::MatchOver);
        }
        self.status = SetStatus::MatchOver;
        self.winning_side = self.set_leader();
        Ok(self.winning_side)
    }
}

#[cfg(test)]
impl MatchState {
    pub(crate) fn team_mut(&mut self, side: Side) -> &mut TeamState {
        &mut self.teams[side.index()]
    }

    pub(crate) fn set_clock(&mut self, clock: u32) {
        self.clock = clock;
        self.objectives.refresh(clock);
    }

    pub(crate) fn objectives_mut(&mut self) -> &mut ObjectiveState {
        &mut self.objectives
    }

    pub(crate) fn set_wins_mut(&mut self) -> &mut [u8; 2] {
        &mut self.set_wins
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::roster::fixtures::roster;

    fn fresh() -> MatchState {
        MatchState::new(
            Uuid::new_v4(),
            MatchCategory::Regular,
            roster("a", 50.0),
            roster("b", 50.0),
            3000,
        )
    }

    fn lane_target(lane: Lane, tier: StructureTier) -> StructureTarget {
        StructureTarget {
            lane: Some(lane),
            tier,
        }
    }

    fn clear_lanes(state: &mut MatchState, attacker: Side) {
        for lane in Lane::ALL {
            for tier in [
                StructureTier::Tier1,
                StructureTier::Tier2,
                StructureTier::Tier3,
                StructureTier::Inhibitor,
            ] {
                state
                    .destroy_structure(attacker, lane_target(lane, tier), 0)
                    .unwrap();
            }
        }
    }

    #[test]
    fn new_match_starts_with_everything_standing() {
        let state = fresh();
        assert_eq!(state.set_number(), 1);
        assert_eq!(state.clock(), 0);
        assert_eq!(state.sets_to_win(), 2);
        assert_eq!(state.max_sets(), 3);
        for side in Side::BOTH {
            assert_eq!(state.team(side).structures, StructureState::standing());
            assert_eq!(state.team(side).gold, 2500);
        }
    }

    #[test]
    fn lane_tiers_fall_in_order() {
        let mut state = fresh();
        let err = state
            .destroy_structure(Side::A, lane_target(Lane::Mid, StructureTier::Tier2), 0)
            .unwrap_err();
        assert_eq!(err, StateError::StructureGated(StructureTier::Tier2));

        state
            .destroy_structure(Side::A, lane_target(Lane::Mid, StructureTier::Tier1), 0)
            .unwrap();
        assert!(!state.team(Side::B).structures.mid.tier1);
        assert!(state.team(Side::A).structures.mid.tier1);
    }

    #[test]
    fn twin_turrets_wait_for_all_inhibitors() {
        let mut state = fresh();
        let twin = StructureTarget {
            lane: None,
            tier: StructureTier::TwinTurretA,
        };
        for lane in [Lane::Top, Lane::Mid] {
            for tier in [
                StructureTier::Tier1,
                StructureTier::Tier2,
                StructureTier::Tier3,
                StructureTier::Inhibitor,
            ] {
                state
                    .destroy_structure(Side::A, lane_target(lane, tier), 0)
                    .unwrap();
            }
        }
        assert!(state.destroy_structure(Side::A, twin, 0).is_err());
        assert!(state.team(Side::B).structures.nexus.twin_turret_a);
    }

    #[test]
    fn core_waits_for_both_twin_turrets() {
        let mut state = fresh();
        clear_lanes(&mut state, Side::A);
        let core = StructureTarget {
            lane: None,
            tier: StructureTier::Core,
        };
        assert!(state.destroy_structure(Side::A, core, 0).is_err());

        state
            .destroy_structure(
                Side::A,
                StructureTarget {
                    lane: None,
                    tier: StructureTier::TwinTurretA,
                },
                0,
            )
            .unwrap();
        assert!(state.destroy_structure(Side::A, core, 0).is_err());

        state
            .destroy_structure(
                Side::A,
                StructureTarget {
                    lane: None,
                    tier: StructureTier::TwinTurretB,
                },
                0,
            )
            .unwrap();
        assert_eq!(state.team(Side::B).structures.attackable(), vec![core]);
        state.destroy_structure(Side::A, core, 0).unwrap();
        assert_eq!(state.fallen_nexus(), Some(Side::B));
    }

    #[test]
    fn killed_actor_is_dead_until_respawn() {
        let mut state = fresh();
        let killer = state.team(Side::A).members[3].id;
        let victim = state.team(Side::B).members[0].id;
        state
            .record_kills(
                Side::A,
                &[KillRecord {
                    killer,
                    victim,
                    assists: vec![],
                    bounty: 300,
                }],
                20,
            )
            .unwrap();

        assert!(!state.is_alive(victim));
        assert_eq!(state.dead_count(Side::B), 1);
        assert_eq!(state.team(Side::A).kills, 1);
        assert_eq!(state.team(Side::B).member(victim).unwrap().deaths, 1);

        state.advance_clock(10).unwrap();
        state.prune_respawns();
        assert!(!state.is_alive(victim));
        state.advance_clock(10).unwrap();
        state.prune_respawns();
        assert!(state.is_alive(victim));
        assert!(state.respawns().entries().is_empty());
    }

    #[test]
    fn dead_actor_cannot_be_killed_again() {
        let mut state = fresh();
        let killer = state.team(Side::A).members[3].id;
        let victim = state.team(Side::B).members[0].id;
        let kill = KillRecord {
            killer,
            victim,
            assists: vec![],
            bounty: 300,
        };
        state.record_kills(Side::A, &[kill.clone()], 30).unwrap();
        assert_eq!(
            state.record_kills(Side::A, &[kill], 30).unwrap_err(),
            StateError::InvalidActor(victim)
        );
    }

    #[test]
    fn fourth_dragon_unlocks_elder_and_closes_the_pit() {
        let mut state = fresh();
        for i in 0..4u32 {
            state.set_clock(DRAGON_FIRST_SPAWN + i * DRAGON_RESPAWN);
            let soul = state.take_dragon(Side::A, DragonType::Ocean, 250).unwrap();
            assert_eq!(soul, i == 3);
        }
        assert!(state.objectives().elder_available);
        assert!(!state.dragon_up());

        state.set_clock(DRAGON_FIRST_SPAWN + 4 * DRAGON_RESPAWN);
        assert!(state.objectives().elder_alive);
        assert!(!state.dragon_up());
        assert!(state.take_dragon(Side::B, DragonType::Cloud, 250).is_err());
    }

    #[test]
    fn baron_buff_expires_after_three_minutes() {
        let mut state = fresh();
        state.set_clock(BARON_FIRST_SPAWN);
        state.take_baron(Side::B, 1500).unwrap();
        assert_eq!(state.buffs().baron_holder(), Some(Side::B));
        assert!(!state.objectives().baron_alive);

        state.advance_clock(BUFF_DURATION - 10).unwrap();
        assert_eq!(state.buffs().baron_holder(), Some(Side::B));
        state.advance_clock(10).unwrap();
        assert_eq!(state.buffs().baron_holder(), None);
    }

    #[test]
    fn herald_is_single_use_per_set() {
        let mut state = fresh();
        state.set_clock(HERALD_SPAWN);
        state.take_herald(Side::A, 400).unwrap();
        assert!(state.team(Side::A).herald_charge);
        assert!(state.take_herald(Side::B, 400).is_err());
        state.advance_clock(60).unwrap();
        assert!(!state.objectives().herald_alive);
    }

    #[test]
    fn finishing_the_deciding_set_ends_the_match() {
        let mut state = fresh();
        let first = state.finish_set(Side::A, DecidedBy::Nexus).unwrap();
        assert!(!first.match_over);
        assert_eq!(state.status(), SetStatus::SetOver);

        state.start_next_set(2800).unwrap();
        assert_eq!(state.set_number(), 2);
        assert_eq!(state.clock(), 0);
        assert_eq!(state.set_wins(), [1, 0]);

        let second = state.finish_set(Side::A, DecidedBy::Nexus).unwrap();
        assert!(second.match_over);
        assert!(state.is_match_over());
        assert_eq!(state.set_wins(), [2, 0]);
        assert_eq!(state.start_next_set(2800).unwrap_err(), StateError::MatchOver);
        assert_eq!(
            state.finish_set(Side::A, DecidedBy::Nexus).unwrap_err(),
            StateError::NotInProgress
        );
    }

    #[test]
    fn next_set_resets_per_set_state() {
        let mut state = fresh();
        state.set_clock(BARON_FIRST_SPAWN);
        state.take_baron(Side::A, 1500).unwrap();
        clear_lanes(&mut state, Side::A);
        state.finish_set(Side::A, DecidedBy::TimeLimit).unwrap();
        state.start_next_set(3000).unwrap();

        assert_eq!(state.team(Side::B).structures, StructureState::standing());
        assert_eq!(state.team(Side::A).barons, 0);
        assert!(state.buffs().baron.is_none());
        assert!(state.log().is_empty());
        assert_eq!(state.history().len(), 1);
    }

    #[test]
    fn conclude_awards_the_set_leader() {
        let mut state = fresh();
        state.finish_set(Side::B, DecidedBy::Nexus).unwrap();
        state.start_next_set(3000).unwrap();
        assert_eq!(state.conclude().unwrap(), Some(Side::B));
        assert!(state.is_match_over());

        let mut level = fresh();
        assert_eq!(level.conclude().unwrap(), None);
    }

    #[test]
    fn snapshot_round_trips_through_json() {
        let mut state = fresh();
        state.advance_clock(600).unwrap();
        let json = serde_json::to_string(&state).unwrap();
        let back: MatchState = serde_json::from_str(&json).unwrap();
        assert_eq!(back, state);
    }
}
