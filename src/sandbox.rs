//! Sandbox Park
//!
//! A small but complete ruleset: scenery, rides with track, staff, park
//! gate and cheats. The binary runs it, the test suites drive it, and the
//! benches measure it. Handlers are written against the two-phase
//! interface and never mutate during validation.

use std::collections::{BTreeMap, BTreeSet};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::EngineConfig;
use crate::core::hash::StateHasher;
use crate::core::money::{format_money, Money};
use crate::core::rng::DeterministicRng;
use crate::game::command::{
    Command, CommandArgs, CommandFlags, CommandKind, CommandResult, ErrorBody, GhostFamily,
};
use crate::game::finance::ExpenditureType;
use crate::game::registry::{AuditLoggable, CommandHandler, CommandRegistry};
use crate::game::state::{PersistenceHooks, SimulationContext, World};

/// Base price of a new ride, before track.
pub const RIDE_BASE_COST: Money = 200;

/// Price of one track piece.
pub const TRACK_PIECE_COST: Money = 50;

/// Price of hiring one staff member.
pub const STAFF_HIRE_COST: Money = 500;

/// Highest ride or entrance price.
pub const MAX_PRICE: Money = 200;

/// Chance per tick (out of 100) that a guest arrives at an open park.
const GUEST_ARRIVAL_PERCENT: u32 = 25;

/// Ride kinds by argument value.
pub const RIDE_KINDS: [&str; 6] = [
    "Merry-Go-Round",
    "Ferris Wheel",
    "Wooden Coaster",
    "Log Flume",
    "Go Karts",
    "Haunted House",
];

const CANT_POSITION: &str = "Can't position this here...";
const CANT_BUILD_RIDE: &str = "Can't build this ride...";
const CANT_DEMOLISH: &str = "Can't demolish ride...";
const CANT_CHANGE: &str = "Can't change this...";

// =============================================================================
// WORLD
// =============================================================================

/// One ride.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ride {
    /// Stable id, never reused
    pub id: u32,
    /// Index into [`RIDE_KINDS`]
    pub kind: u8,
    /// Track pieces built
    pub track_pieces: u32,
    /// Ticket price
    pub price: Money,
    /// Accepting guests
    pub open: bool,
    /// Construction spend, half refunded on demolition
    pub value: Money,
    /// Guests carried so far
    pub customers: u32,
}

impl Ride {
    /// Display name, e.g. "Ferris Wheel 3".
    pub fn name(&self) -> String {
        let kind = RIDE_KINDS.get(self.kind as usize).copied().unwrap_or("Ride");
        format!("{} {}", kind, self.id)
    }
}

/// Sandbox world state.
///
/// Ghosts and the hook counters are local to this process and never
/// leave it: they are skipped by the snapshot and the checksum.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxPark {
    /// Placed scenery by tile, valued at its build cost
    pub scenery: BTreeMap<(i32, i32), Money>,
    /// Rides in build order
    pub rides: Vec<Ride>,
    /// Next ride id
    pub next_ride_id: u32,
    /// Staff employed
    pub staff: u32,
    /// Guests in the park
    pub guests: u32,
    /// Park gate state
    pub park_open: bool,
    /// Admission price
    pub entrance_fee: Money,

    /// Local placement previews
    #[serde(skip)]
    pub ghosts: BTreeSet<(i32, i32)>,
    /// Times animations were refreshed while paused
    #[serde(skip)]
    pub animation_refreshes: u32,
    /// Saves requested
    #[serde(skip)]
    pub saves: u32,
    /// Loads completed
    #[serde(skip)]
    pub loads: u32,
}

impl SandboxPark {
    fn ride_index_by_id(&self, id: u32) -> Option<usize> {
        self.rides.iter().position(|ride| ride.id == id)
    }

    fn ride_at(&self, index: i32) -> Option<&Ride> {
        usize::try_from(index).ok().and_then(|i| self.rides.get(i))
    }
}

impl PersistenceHooks for SandboxPark {
    fn on_load_complete(&mut self) {
        self.ghosts.clear();
        self.loads += 1;
    }

    fn on_before_save(&mut self) {
        self.saves += 1;
    }
}

impl World for SandboxPark {
    fn update(&mut self, rng: &mut DeterministicRng, _tick: u32) {
        let roll = rng.next_max(100);
        if self.park_open && roll < GUEST_ARRIVAL_PERCENT {
            self.guests += 1;
        }

        if self.guests == 0 {
            return;
        }
        for ride in self.rides.iter_mut().filter(|ride| ride.open) {
            let riders = rng.next_max(self.guests.min(8) + 1);
            ride.customers = ride.customers.saturating_add(riders);
        }
    }

    fn checksum(&self, hasher: &mut StateHasher) {
        hasher.put_len(self.scenery.len());
        for (tile, value) in &self.scenery {
            hasher.put(tile).put(value);
        }
        hasher.put_len(self.rides.len());
        for ride in &self.rides {
            hasher
                .put(&ride.id)
                .put(&ride.kind)
                .put(&ride.track_pieces)
                .put(&ride.price)
                .put(&ride.open)
                .put(&ride.value)
                .put(&ride.customers);
        }
        hasher
            .put(&self.next_ride_id)
            .put(&self.staff)
            .put(&self.guests)
            .put(&self.park_open)
            .put(&self.entrance_fee);
    }

    fn remove_ghost_placements(&mut self, family: GhostFamily) {
        if family == GhostFamily::Scenery {
            self.ghosts.clear();
        }
    }

    fn invalidate_animations(&mut self) {
        self.animation_refreshes += 1;
    }

    fn snapshot(&self) -> Vec<u8> {
        match bincode::serialize(self) {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(%err, "park snapshot failed");
                Vec::new()
            }
        }
    }

    fn restore(&mut self, payload: &[u8]) -> anyhow::Result<()> {
        let mut loaded: SandboxPark = bincode::deserialize(payload).context("invalid park snapshot")?;
        loaded.animation_refreshes = self.animation_refreshes;
        loaded.saves = self.saves;
        loaded.loads = self.loads;
        *self = loaded;
        Ok(())
    }
}

// =============================================================================
// HANDLERS
// =============================================================================

type Ctx = SimulationContext<SandboxPark>;

fn tile(args: &CommandArgs) -> (i32, i32) {
    (args.get(0), args.get(1))
}

/// Small scenery: `[x, y, cost]`.
pub struct PlaceScenery;

impl PlaceScenery {
    fn price(ctx: &Ctx, args: &CommandArgs, flags: CommandFlags) -> CommandResult {
        let cost = Money::from(args.get(2));
        if cost < 0 {
            return CommandResult::failed(CANT_POSITION, ErrorBody::Message("Invalid scenery price".into()));
        }
        if flags.contains(CommandFlags::GHOST) {
            return CommandResult::ok(0);
        }
        if ctx.is_paused() && !flags.contains(CommandFlags::NETWORKED) {
            return CommandResult::failed(CANT_POSITION, ErrorBody::NotWhilePaused);
        }
        if ctx.world.scenery.contains_key(&tile(args)) {
            return CommandResult::failed(CANT_POSITION, ErrorBody::Message("Tile already occupied".into()));
        }
        CommandResult::ok(cost)
    }
}

impl AuditLoggable<SandboxPark> for PlaceScenery {
    fn audit_summary(&self, _world: &SandboxPark, args: &CommandArgs, flags: CommandFlags) -> Option<String> {
        if flags.contains(CommandFlags::GHOST) {
            return None;
        }
        let (x, y) = tile(args);
        Some(format!("has placed scenery at ({x}, {y})"))
    }
}

impl CommandHandler<SandboxPark> for PlaceScenery {
    fn validate(&self, ctx: &mut Ctx, args: &mut CommandArgs, flags: CommandFlags) -> CommandResult {
        Self::price(ctx, args, flags)
    }

    fn apply(&self, ctx: &mut Ctx, args: &mut CommandArgs, flags: CommandFlags) -> CommandResult {
        let result = Self::price(ctx, args, flags);
        if !result.is_ok() {
            return result;
        }
        if flags.contains(CommandFlags::GHOST) {
            ctx.world.ghosts.insert(tile(args));
        } else {
            ctx.world.scenery.insert(tile(args), result.cost);
            ctx.set_expenditure_type(ExpenditureType::Landscaping);
        }
        result
    }

    fn error_title(&self) -> &'static str {
        CANT_POSITION
    }
}

/// Scenery removal: `[x, y]`. Refunds half the build cost.
pub struct RemoveScenery;

impl RemoveScenery {
    fn price(ctx: &Ctx, args: &CommandArgs) -> CommandResult {
        match ctx.world.scenery.get(&tile(args)) {
            Some(&value) => CommandResult::ok(-(value / 2)),
            None => CommandResult::failed(CANT_CHANGE, ErrorBody::Message("No scenery here".into())),
        }
    }
}

impl AuditLoggable<SandboxPark> for RemoveScenery {
    fn audit_summary(&self, _world: &SandboxPark, args: &CommandArgs, flags: CommandFlags) -> Option<String> {
        if flags.contains(CommandFlags::GHOST) {
            return None;
        }
        let (x, y) = tile(args);
        Some(format!("has removed scenery at ({x}, {y})"))
    }
}

impl CommandHandler<SandboxPark> for RemoveScenery {
    fn validate(&self, ctx: &mut Ctx, args: &mut CommandArgs, _flags: CommandFlags) -> CommandResult {
        Self::price(ctx, args)
    }

    fn apply(&self, ctx: &mut Ctx, args: &mut CommandArgs, _flags: CommandFlags) -> CommandResult {
        let result = Self::price(ctx, args);
        if result.is_ok() {
            ctx.world.scenery.remove(&tile(args));
            ctx.set_expenditure_type(ExpenditureType::Landscaping);
        }
        result
    }
}

/// New ride: `[kind]`. Builds `kind + 1` track pieces as sub-commands.
pub struct CreateRide;

impl CreateRide {
    fn price(args: &CommandArgs) -> CommandResult {
        let kind = args.get(0);
        if kind < 0 || kind as usize >= RIDE_KINDS.len() {
            return CommandResult::failed(CANT_BUILD_RIDE, ErrorBody::Message("Unknown ride type".into()));
        }
        CommandResult::ok(RIDE_BASE_COST + Money::from(kind + 1) * TRACK_PIECE_COST)
    }
}

impl AuditLoggable<SandboxPark> for CreateRide {
    fn audit_summary(&self, _world: &SandboxPark, args: &CommandArgs, _flags: CommandFlags) -> Option<String> {
        let kind = usize::try_from(args.get(0)).ok()?;
        RIDE_KINDS.get(kind).map(|name| format!("has created new ride {name}"))
    }
}

impl CommandHandler<SandboxPark> for CreateRide {
    fn validate(&self, _ctx: &mut Ctx, args: &mut CommandArgs, _flags: CommandFlags) -> CommandResult {
        Self::price(args)
    }

    fn apply(&self, ctx: &mut Ctx, args: &mut CommandArgs, flags: CommandFlags) -> CommandResult {
        let result = Self::price(args);
        if !result.is_ok() {
            return result;
        }
        let kind = args.get(0);
        let id = ctx.world.next_ride_id;
        ctx.world.next_ride_id += 1;
        ctx.world.rides.push(Ride {
            id,
            kind: kind as u8,
            track_pieces: 0,
            price: 0,
            open: false,
            value: RIDE_BASE_COST,
            customers: 0,
        });

        for _ in 0..=kind {
            let mut piece = Command::new(CommandKind::PlaceTrack, flags, [id as i32, 0, 0, 0, 0]);
            ctx.execute(&mut piece);
        }

        // Slot 0 reports the new ride's id to the result callback.
        args.set(0, id as i32);
        ctx.set_expenditure_type(ExpenditureType::RideConstruction);
        result
    }

    fn error_title(&self) -> &'static str {
        CANT_BUILD_RIDE
    }
}

/// Track piece: `[ride id]`.
pub struct PlaceTrack;

impl AuditLoggable<SandboxPark> for PlaceTrack {
    fn audit_summary(&self, _world: &SandboxPark, args: &CommandArgs, _flags: CommandFlags) -> Option<String> {
        Some(format!("has placed track on ride {}", args.get(0)))
    }
}

impl CommandHandler<SandboxPark> for PlaceTrack {
    fn validate(&self, ctx: &mut Ctx, args: &mut CommandArgs, _flags: CommandFlags) -> CommandResult {
        match u32::try_from(args.get(0)).ok().and_then(|id| ctx.world.ride_index_by_id(id)) {
            Some(_) => CommandResult::ok(TRACK_PIECE_COST),
            None => CommandResult::failed(CANT_BUILD_RIDE, ErrorBody::Message("Ride not found".into())),
        }
    }

    fn apply(&self, ctx: &mut Ctx, args: &mut CommandArgs, _flags: CommandFlags) -> CommandResult {
        let Some(index) = u32::try_from(args.get(0)).ok().and_then(|id| ctx.world.ride_index_by_id(id)) else {
            return CommandResult::failed(CANT_BUILD_RIDE, ErrorBody::Message("Ride not found".into()));
        };
        let ride = &mut ctx.world.rides[index];
        ride.track_pieces += 1;
        ride.value += TRACK_PIECE_COST;
        ctx.set_expenditure_type(ExpenditureType::RideConstruction);
        CommandResult::ok(TRACK_PIECE_COST)
    }
}

/// Track removal: `[ride id]`. Refunds half a piece.
pub struct RemoveTrack;

impl RemoveTrack {
    fn find(ctx: &Ctx, args: &CommandArgs) -> Option<usize> {
        let index = u32::try_from(args.get(0)).ok().and_then(|id| ctx.world.ride_index_by_id(id))?;
        (ctx.world.rides[index].track_pieces > 0).then_some(index)
    }
}

impl AuditLoggable<SandboxPark> for RemoveTrack {
    fn audit_summary(&self, _world: &SandboxPark, args: &CommandArgs, _flags: CommandFlags) -> Option<String> {
        Some(format!("has removed track from ride {}", args.get(0)))
    }
}

impl CommandHandler<SandboxPark> for RemoveTrack {
    fn validate(&self, ctx: &mut Ctx, args: &mut CommandArgs, _flags: CommandFlags) -> CommandResult {
        match Self::find(ctx, args) {
            Some(_) => CommandResult::ok(-(TRACK_PIECE_COST / 2)),
            None => CommandResult::failed(CANT_CHANGE, ErrorBody::Message("No track to remove".into())),
        }
    }

    fn apply(&self, ctx: &mut Ctx, args: &mut CommandArgs, _flags: CommandFlags) -> CommandResult {
        let Some(index) = Self::find(ctx, args) else {
            return CommandResult::failed(CANT_CHANGE, ErrorBody::Message("No track to remove".into()));
        };
        let ride = &mut ctx.world.rides[index];
        ride.track_pieces -= 1;
        ride.value = (ride.value - TRACK_PIECE_COST).max(0);
        CommandResult::ok(-(TRACK_PIECE_COST / 2))
    }
}

/// Demolition: `[ride index]`. Tears down track piece by piece as
/// sub-commands, then refunds half the ride's value.
pub struct DemolishRide;

impl AuditLoggable<SandboxPark> for DemolishRide {
    fn audit_summary(&self, world: &SandboxPark, args: &CommandArgs, _flags: CommandFlags) -> Option<String> {
        world
            .ride_at(args.get(0))
            .map(|ride| format!("has demolished ride {}", ride.name()))
    }
}

impl CommandHandler<SandboxPark> for DemolishRide {
    fn validate(&self, ctx: &mut Ctx, args: &mut CommandArgs, _flags: CommandFlags) -> CommandResult {
        match ctx.world.ride_at(args.get(0)) {
            Some(ride) => CommandResult::ok(-(ride.value / 2)),
            None => CommandResult::failed(CANT_DEMOLISH, ErrorBody::Message("Ride not found".into())),
        }
    }

    fn apply(&self, ctx: &mut Ctx, args: &mut CommandArgs, flags: CommandFlags) -> CommandResult {
        let Some(ride) = ctx.world.ride_at(args.get(0)) else {
            return CommandResult::failed(CANT_DEMOLISH, ErrorBody::Message("Ride not found".into()));
        };
        let (id, pieces, refund) = (ride.id, ride.track_pieces, -(ride.value / 2));

        for _ in 0..pieces {
            let mut piece = Command::new(CommandKind::RemoveTrack, flags, [id as i32, 0, 0, 0, 0]);
            ctx.execute(&mut piece);
        }
        if let Some(index) = ctx.world.ride_index_by_id(id) {
            ctx.world.rides.remove(index);
        }
        ctx.set_expenditure_type(ExpenditureType::RideConstruction);
        CommandResult::ok(refund)
    }

    fn error_title(&self) -> &'static str {
        CANT_DEMOLISH
    }
}

/// Ticket price: `[ride index, price]`.
pub struct SetRidePrice;

impl SetRidePrice {
    fn check(ctx: &Ctx, args: &CommandArgs) -> CommandResult {
        if ctx.world.ride_at(args.get(0)).is_none() {
            return CommandResult::failed(CANT_CHANGE, ErrorBody::Message("Ride not found".into()));
        }
        let price = Money::from(args.get(1));
        if !(0..=MAX_PRICE).contains(&price) {
            return CommandResult::failed(CANT_CHANGE, ErrorBody::Message("Price out of range".into()));
        }
        CommandResult::ok(0)
    }
}

impl AuditLoggable<SandboxPark> for SetRidePrice {
    fn audit_summary(&self, world: &SandboxPark, args: &CommandArgs, _flags: CommandFlags) -> Option<String> {
        let ride = world.ride_at(args.get(0))?;
        Some(format!(
            "has changed the price of {} to {}",
            ride.name(),
            format_money(Money::from(args.get(1)))
        ))
    }
}

impl CommandHandler<SandboxPark> for SetRidePrice {
    fn validate(&self, ctx: &mut Ctx, args: &mut CommandArgs, _flags: CommandFlags) -> CommandResult {
        Self::check(ctx, args)
    }

    fn apply(&self, ctx: &mut Ctx, args: &mut CommandArgs, _flags: CommandFlags) -> CommandResult {
        let result = Self::check(ctx, args);
        if result.is_ok() {
            if let Some(ride) = usize::try_from(args.get(0)).ok().and_then(|i| ctx.world.rides.get_mut(i)) {
                ride.price = Money::from(args.get(1));
            }
        }
        result
    }
}

/// Open or close a ride: `[ride index, open]`.
pub struct SetRideStatus;

impl AuditLoggable<SandboxPark> for SetRideStatus {
    fn audit_summary(&self, world: &SandboxPark, args: &CommandArgs, _flags: CommandFlags) -> Option<String> {
        let ride = world.ride_at(args.get(0))?;
        let verb = if args.get(1) != 0 { "opened" } else { "closed" };
        Some(format!("has {verb} {}", ride.name()))
    }
}

impl CommandHandler<SandboxPark> for SetRideStatus {
    fn validate(&self, ctx: &mut Ctx, args: &mut CommandArgs, _flags: CommandFlags) -> CommandResult {
        match ctx.world.ride_at(args.get(0)) {
            Some(ride) if ride.track_pieces == 0 && args.get(1) != 0 => {
                CommandResult::failed(CANT_CHANGE, ErrorBody::Message("Ride has no track".into()))
            }
            Some(_) => CommandResult::ok(0),
            None => CommandResult::failed(CANT_CHANGE, ErrorBody::Message("Ride not found".into())),
        }
    }

    fn apply(&self, ctx: &mut Ctx, args: &mut CommandArgs, flags: CommandFlags) -> CommandResult {
        let result = self.validate(ctx, args, flags);
        if result.is_ok() {
            if let Some(ride) = usize::try_from(args.get(0)).ok().and_then(|i| ctx.world.rides.get_mut(i)) {
                ride.open = args.get(1) != 0;
            }
        }
        result
    }
}

/// Park gate: `[open]`.
pub struct SetParkOpen;

impl AuditLoggable<SandboxPark> for SetParkOpen {
    fn audit_summary(&self, _world: &SandboxPark, args: &CommandArgs, _flags: CommandFlags) -> Option<String> {
        Some(if args.get(0) != 0 {
            "has opened the park".to_string()
        } else {
            "has closed the park".to_string()
        })
    }
}

impl CommandHandler<SandboxPark> for SetParkOpen {
    fn validate(&self, _ctx: &mut Ctx, _args: &mut CommandArgs, _flags: CommandFlags) -> CommandResult {
        CommandResult::ok(0)
    }

    fn apply(&self, ctx: &mut Ctx, args: &mut CommandArgs, _flags: CommandFlags) -> CommandResult {
        ctx.world.park_open = args.get(0) != 0;
        CommandResult::ok(0)
    }
}

/// Admission price: `[fee]`.
pub struct SetParkEntranceFee;

impl AuditLoggable<SandboxPark> for SetParkEntranceFee {
    fn audit_summary(&self, _world: &SandboxPark, args: &CommandArgs, _flags: CommandFlags) -> Option<String> {
        Some(format!(
            "has changed the park entrance fee to {}",
            format_money(Money::from(args.get(0)))
        ))
    }
}

impl CommandHandler<SandboxPark> for SetParkEntranceFee {
    fn validate(&self, _ctx: &mut Ctx, args: &mut CommandArgs, _flags: CommandFlags) -> CommandResult {
        if (0..=MAX_PRICE).contains(&Money::from(args.get(0))) {
            CommandResult::ok(0)
        } else {
            CommandResult::failed(CANT_CHANGE, ErrorBody::Message("Fee out of range".into()))
        }
    }

    fn apply(&self, ctx: &mut Ctx, args: &mut CommandArgs, flags: CommandFlags) -> CommandResult {
        let result = self.validate(ctx, args, flags);
        if result.is_ok() {
            ctx.world.entrance_fee = Money::from(args.get(0));
        }
        result
    }
}

/// Cheats: `[cheat, value]`. 0 adds `value` cash, 1 sets the no-money flag.
pub struct Cheat;

impl AuditLoggable<SandboxPark> for Cheat {
    fn audit_summary(&self, _world: &SandboxPark, args: &CommandArgs, _flags: CommandFlags) -> Option<String> {
        match args.get(0) {
            0 => Some(format!("has used cheat: Add {}", format_money(Money::from(args.get(1))))),
            1 => Some("has used cheat: No money".to_string()),
            _ => None,
        }
    }
}

impl CommandHandler<SandboxPark> for Cheat {
    fn validate(&self, _ctx: &mut Ctx, args: &mut CommandArgs, _flags: CommandFlags) -> CommandResult {
        match args.get(0) {
            0 | 1 => CommandResult::ok(0),
            _ => CommandResult::failed(CANT_CHANGE, ErrorBody::Message("Unknown cheat".into())),
        }
    }

    fn apply(&self, ctx: &mut Ctx, args: &mut CommandArgs, _flags: CommandFlags) -> CommandResult {
        match args.get(0) {
            0 => ctx.finances.cash = ctx.finances.cash.saturating_add(Money::from(args.get(1))),
            1 => ctx.finances.no_money = args.get(1) != 0,
            _ => return CommandResult::failed(CANT_CHANGE, ErrorBody::Message("Unknown cheat".into())),
        }
        CommandResult::ok(0)
    }
}

fn hire_staff(ctx: &mut Ctx, _args: &mut CommandArgs, flags: CommandFlags) -> CommandResult {
    if flags.contains(CommandFlags::APPLY) {
        ctx.world.staff += 1;
        ctx.set_expenditure_type(ExpenditureType::Wages);
    }
    CommandResult::ok(STAFF_HIRE_COST)
}

fn fire_staff(ctx: &mut Ctx, _args: &mut CommandArgs, flags: CommandFlags) -> CommandResult {
    if ctx.world.staff == 0 {
        return CommandResult::failed(CANT_CHANGE, ErrorBody::Message("No staff to fire".into()));
    }
    if flags.contains(CommandFlags::APPLY) {
        ctx.world.staff -= 1;
    }
    CommandResult::ok(0)
}

// =============================================================================
// SETUP
// =============================================================================

/// Register the sandbox handlers.
pub fn register(registry: &mut CommandRegistry<SandboxPark>) {
    registry.register(CommandKind::PlaceScenery, PlaceScenery);
    registry.register(CommandKind::RemoveScenery, RemoveScenery);
    registry.register(CommandKind::CreateRide, CreateRide);
    registry.register(CommandKind::PlaceTrack, PlaceTrack);
    registry.register(CommandKind::RemoveTrack, RemoveTrack);
    registry.register(CommandKind::DemolishRide, DemolishRide);
    registry.register(CommandKind::SetRidePrice, SetRidePrice);
    registry.register(CommandKind::SetRideStatus, SetRideStatus);
    registry.register(CommandKind::SetParkOpen, SetParkOpen);
    registry.register(CommandKind::SetParkEntranceFee, SetParkEntranceFee);
    registry.register(CommandKind::Cheat, Cheat);
    registry.register_fn(CommandKind::HireNewStaffMember, hire_staff);
    registry.register_fn(CommandKind::FireStaffMember, fire_staff);
}

/// Offline context running the sandbox ruleset.
pub fn new_context(config: EngineConfig) -> SimulationContext<SandboxPark> {
    let mut ctx = SimulationContext::new(SandboxPark::default(), config);
    register(&mut ctx.registry);
    ctx
}

/// Place scenery at `(x, y)` for `cost`.
pub fn place_scenery(x: i32, y: i32, cost: i32) -> Command {
    Command::apply(CommandKind::PlaceScenery, [x, y, cost, 0, 0])
}

/// Build a ride of `kind`.
pub fn create_ride(kind: i32) -> Command {
    Command::apply(CommandKind::CreateRide, [kind, 0, 0, 0, 0])
}

/// Demolish the ride at `index`.
pub fn demolish_ride(index: i32) -> Command {
    Command::apply(CommandKind::DemolishRide, [index, 0, 0, 0, 0])
}

/// Set the ticket price of the ride at `index`.
pub fn set_ride_price(index: i32, price: i32) -> Command {
    Command::apply(CommandKind::SetRidePrice, [index, price, 0, 0, 0])
}

/// Open or close the ride at `index`.
pub fn set_ride_status(index: i32, open: bool) -> Command {
    Command::apply(CommandKind::SetRideStatus, [index, open as i32, 0, 0, 0])
}

/// Open or close the park.
pub fn set_park_open(open: bool) -> Command {
    Command::apply(CommandKind::SetParkOpen, [open as i32, 0, 0, 0, 0])
}

/// Hire one staff member.
pub fn hire_staff_member() -> Command {
    Command::apply(CommandKind::HireNewStaffMember, [0; 5])
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    use proptest::prelude::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    use crate::game::tick::run_frame;
    use crate::network::auth::AuthConfig;
    use crate::network::sync::NetworkSync;
    use crate::network::transport::channel_server;

    fn offline(cash: Money) -> Ctx {
        let mut ctx = new_context(EngineConfig::default());
        ctx.load_scenario([5, 8], cash);
        ctx.take_events();
        ctx
    }

    #[test]
    fn test_ruleset_leaves_modify_tile_unregistered() {
        let ctx = offline(0);
        assert!(!ctx.registry.contains(CommandKind::ModifyTile));
        assert!(ctx.registry.contains(CommandKind::DemolishRide));
        assert_eq!(ctx.registry.len(), 15);
    }

    #[test]
    fn test_create_ride_builds_track() {
        let mut ctx = offline(1_000);
        let result = ctx.execute(&mut create_ride(2));
        assert_eq!(result.cost, RIDE_BASE_COST + 3 * TRACK_PIECE_COST);
        assert_eq!(ctx.finances.cash, 1_000 - result.cost);
        assert_eq!(ctx.world.rides.len(), 1);
        assert_eq!(ctx.world.rides[0].track_pieces, 3);
        assert_eq!(ctx.world.rides[0].name(), "Wooden Coaster 0");
        assert_eq!(ctx.finances.spent_on(ExpenditureType::RideConstruction), result.cost);
    }

    #[test]
    fn test_demolish_refunds_half() {
        let mut ctx = offline(1_000);
        ctx.execute(&mut create_ride(1));
        let value = ctx.world.rides[0].value;
        let cash = ctx.finances.cash;
        let result = ctx.execute(&mut demolish_ride(0));
        assert_eq!(result.cost, -(value / 2));
        assert_eq!(ctx.finances.cash, cash + value / 2);
        assert!(ctx.world.rides.is_empty());
        assert!(!ctx.execute(&mut demolish_ride(0)).is_ok());
    }

    #[test]
    fn test_server_nested_command_audits_once() {
        let mut config = EngineConfig::default();
        config.network.log_server_actions = true;
        let (transport, _acceptor) = channel_server();
        let network = NetworkSync::server(config.network.clone(), Box::new(transport), AuthConfig::default());
        let mut ctx = new_context(config).with_network(network);
        ctx.load_scenario([1, 2], 5_000);

        let hits = Rc::new(Cell::new(0));
        let counter = hits.clone();
        let id = ctx.callbacks.register(move |_| counter.set(counter.get() + 1));
        ctx.set_result_callback(id);

        // Wooden Coaster: three nested track placements
        let result = ctx.execute(&mut create_ride(2));
        assert!(result.is_ok());
        assert_eq!(ctx.world.rides[0].track_pieces, 3);
        assert_eq!(ctx.network.server_log().lines().len(), 1);
        assert!(ctx
            .network
            .server_log()
            .last()
            .unwrap()
            .ends_with("has created new ride Wooden Coaster"));
        assert_eq!(hits.get(), 1);
        assert_eq!(ctx.nest().depth(), 0);
    }

    #[test]
    fn test_ghost_scenery_is_free_and_local() {
        let mut ctx = offline(100);
        let before = ctx.checksum();
        let mut ghost = place_scenery(1, 1, 80).with_flags(CommandFlags::GHOST);
        assert_eq!(ctx.execute(&mut ghost).cost, 0);
        assert_eq!(ctx.finances.cash, 100);
        assert!(ctx.world.ghosts.contains(&(1, 1)));
        assert_eq!(ctx.checksum(), before);
    }

    #[test]
    fn test_scenery_refused_while_paused() {
        let mut ctx = offline(100);
        let mut pause = Command::apply(CommandKind::TogglePause, [0; 5]);
        ctx.execute(&mut pause);
        let result = ctx.execute(&mut place_scenery(1, 1, 10));
        assert_eq!(result.error.map(|e| e.body), Some(ErrorBody::NotWhilePaused));
    }

    #[test]
    fn test_cheats() {
        let mut ctx = offline(0);
        ctx.execute(&mut Command::apply(CommandKind::Cheat, [0, 700, 0, 0, 0]));
        assert_eq!(ctx.finances.cash, 700);
        ctx.execute(&mut Command::apply(CommandKind::Cheat, [1, 1, 0, 0, 0]));
        assert!(ctx.finances.no_money);
        assert!(ctx.execute(&mut hire_staff_member()).is_ok());
        assert_eq!(ctx.finances.cash, 700);
        assert_eq!(ctx.world.staff, 1);
    }

    #[test]
    fn test_fn_handlers_price_without_mutation() {
        let mut ctx = offline(1_000);
        let mut query = hire_staff_member();
        query.flags -= CommandFlags::APPLY;
        assert_eq!(ctx.execute(&mut query).cost, STAFF_HIRE_COST);
        assert_eq!(ctx.world.staff, 0);
        assert!(!ctx.execute(&mut Command::apply(CommandKind::FireStaffMember, [0; 5])).is_ok());
    }

    #[test]
    fn test_open_park_draws_guests_to_open_rides() {
        let mut ctx = offline(5_000);
        ctx.execute(&mut create_ride(0));
        ctx.execute(&mut set_ride_status(0, true));
        ctx.execute(&mut set_park_open(true));
        for _ in 0..100 {
            run_frame(&mut ctx, 25, 1);
        }
        assert!(ctx.world.guests > 0);
        assert!(ctx.world.rides[0].customers > 0);
    }

    #[test]
    fn test_ride_without_track_stays_closed() {
        let mut ctx = offline(5_000);
        ctx.execute(&mut create_ride(0));
        ctx.execute(&mut Command::apply(CommandKind::RemoveTrack, [0; 5]));
        assert_eq!(ctx.world.rides[0].track_pieces, 0);
        assert!(!ctx.execute(&mut set_ride_status(0, true)).is_ok());
    }

    #[test]
    fn test_snapshot_restores_shared_state_only() {
        let mut server = offline(5_000);
        server.execute(&mut create_ride(3));
        server.execute(&mut place_scenery(4, 2, 30));
        server.execute(&mut set_ride_price(0, 40));
        let payload = server.world.snapshot();

        let mut client = SandboxPark {
            saves: 3,
            ..Default::default()
        };
        client.ghosts.insert((9, 9));
        client.restore(&payload).unwrap();
        assert_eq!(client.rides, server.world.rides);
        assert_eq!(client.scenery, server.world.scenery);
        assert_eq!(client.next_ride_id, 1);
        assert_eq!(client.saves, 3);
        assert!(client.ghosts.is_empty());

        assert!(client.restore(&[0xFF; 3]).is_err());
    }

    #[test]
    fn test_audit_summaries() {
        let mut world = SandboxPark::default();
        world.rides.push(Ride {
            id: 4,
            kind: 1,
            track_pieces: 2,
            price: 0,
            open: false,
            value: 300,
            customers: 0,
        });
        let args = CommandArgs::new([0, 25, 0, 0, 0]);
        assert_eq!(
            SetRidePrice.audit_summary(&world, &args, CommandFlags::APPLY),
            Some("has changed the price of Ferris Wheel 4 to £2.50".to_string())
        );
        assert_eq!(
            DemolishRide.audit_summary(&world, &args, CommandFlags::APPLY),
            Some("has demolished ride Ferris Wheel 4".to_string())
        );
        assert!(PlaceScenery
            .audit_summary(&world, &args, CommandFlags::APPLY | CommandFlags::GHOST)
            .is_none());
    }

    fn random_command(rng: &mut StdRng) -> Command {
        match rng.gen_range(0..6) {
            0 | 1 => place_scenery(rng.gen_range(0..16), rng.gen_range(0..16), rng.gen_range(-5..50)),
            2 => create_ride(rng.gen_range(0..7)),
            3 => demolish_ride(rng.gen_range(0..3)),
            4 => set_ride_status(rng.gen_range(0..3), rng.gen_bool(0.7)),
            _ => set_park_open(true),
        }
    }

    /// Feed a random command stream and frame timing into a fresh park.
    fn run_stream(seed: [u32; 2], stream_seed: u64, frames: usize) -> (u32, [u32; 2], Money, String) {
        let mut ctx = new_context(EngineConfig::default());
        ctx.load_scenario(seed, 3_000);
        let mut stream = StdRng::seed_from_u64(stream_seed);
        for _ in 0..frames {
            if stream.gen_bool(0.4) {
                ctx.execute(&mut random_command(&mut stream));
            }
            run_frame(&mut ctx, stream.gen_range(0..120), 1);
        }
        (ctx.tick(), ctx.rng.state(), ctx.finances.cash, ctx.checksum())
    }

    #[test]
    fn test_random_streams_replay_identically() {
        for stream_seed in 0..8 {
            let a = run_stream([17, 4], stream_seed, 150);
            let b = run_stream([17, 4], stream_seed, 150);
            assert_eq!(a, b, "stream {stream_seed}");
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_engine_is_deterministic(s0 in any::<u32>(), s1 in any::<u32>(), stream_seed in any::<u64>()) {
            let a = run_stream([s0, s1], stream_seed, 60);
            let b = run_stream([s0, s1], stream_seed, 60);
            prop_assert_eq!(a, b);
        }
    }
}
