#![no_std]
use soroban_sdk::{
    contract, contracterror, contractimpl, contracttype, symbol_short, token, Address, Env, Symbol,
};

/// Constants for storage keys.

// Administrator allowed to arm the schedule.
const ADMIN: Symbol = symbol_short!("ADMIN");
// Address of the token held in custody.
const TOKEN_ADDRESS: Symbol = symbol_short!("TOKENADDR");
// Number of whole periods that must elapse before any funds unlock.
const LOCK_PERIODS: Symbol = symbol_short!("LOCKP");
// Number of whole periods over which the deposit unlocks linearly.
const WITHDRAW_PERIODS: Symbol = symbol_short!("WDRAWP");
// Length of one period in seconds.
const PERIOD_DURATION: Symbol = symbol_short!("PERIODT");
// The armed schedule record. Absent until `start_timer` succeeds.
const SCHEDULE: Symbol = symbol_short!("SCHEDULE");

/// Constants for events.

const TIMER_STARTED: Symbol = symbol_short!("ARMED");
const WITHDRAWN: Symbol = symbol_short!("WITHDRAWN");

// Minimum TTL before extending the instance lifetime: 20 days in 5 seconds ledger time
const INSTANCE_LIFETIME_THRESHOLD: u32 = 345_600;
// Extension amount for the instance lifetime: 30 days in 5 seconds ledger time
const INSTANCE_EXTENSION_AMOUNT: u32 = 518_400;

#[contracterror]
#[derive(Copy, Clone, Debug, Eq, PartialEq, PartialOrd, Ord)]
#[repr(u32)]
pub enum Error {
    AlreadyInitialized = 1,
    NotInitialized = 2,
    InvalidConfig = 3,
    NotAuthorized = 4,
    InvalidBeneficiary = 5,
    StartInPast = 6,
    NoDeposit = 7,
    AlreadyArmed = 8,
    NotArmed = 9,
    NotBeneficiary = 10,
    StillLocked = 11,
    InvalidAmount = 12,
}

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LockSchedule {
    pub beneficiary: Address,
    pub starting_time: u64,
    pub lock_periods: u64,
    pub withdraw_periods: u64,
    pub period_duration: u64,
    pub total_deposit: i128,
    pub withdrawn_amount: i128,
}

#[contract]
pub struct TokenLocking;

#[contractimpl]
impl TokenLocking {
    /// Extends the TTL for the contract instance
    pub fn extend_instance_ttl(e: &Env) {
        e.storage()
            .instance()
            .extend_ttl(INSTANCE_LIFETIME_THRESHOLD, INSTANCE_EXTENSION_AMOUNT);
    }

    /// Initialization function. Fixes the administrator, the custody token
    /// and the period configuration for the lifetime of the contract.
    pub fn init(
        env: Env,
        admin: Address,
        token_address: Address,
        lock_periods: u64,
        withdraw_periods: u64,
        period_duration: u64,
    ) -> Result<(), Error> {
        if env.storage().instance().has(&ADMIN) {
            return Err(Error::AlreadyInitialized);
        }
        // The vesting math divides by both of these.
        if withdraw_periods == 0 || period_duration == 0 {
            return Err(Error::InvalidConfig);
        }

        env.storage().instance().set(&ADMIN, &admin);
        env.storage().instance().set(&TOKEN_ADDRESS, &token_address);
        env.storage().instance().set(&LOCK_PERIODS, &lock_periods);
        env.storage()
            .instance()
            .set(&WITHDRAW_PERIODS, &withdraw_periods);
        env.storage()
            .instance()
            .set(&PERIOD_DURATION, &period_duration);

        // Set initial TTL
        Self::extend_instance_ttl(&env);

        Ok(())
    }

    /// Arms the locking schedule for a single beneficiary. Callable once,
    /// by the administrator only, after the deposit has been made to the
    /// contract's custody balance. Snapshots that balance as the total
    /// deposit; the schedule never re-reads the live balance afterwards.
    pub fn start_timer(
        env: Env,
        caller: Address,
        requested_start: u64,
        beneficiary: Address,
    ) -> Result<(), Error> {
        Self::extend_instance_ttl(&env);

        caller.require_auth();

        let admin: Address = env
            .storage()
            .instance()
            .get(&ADMIN)
            .ok_or(Error::NotInitialized)?;
        if caller != admin {
            return Err(Error::NotAuthorized);
        }
        if env.storage().instance().has(&SCHEDULE) {
            return Err(Error::AlreadyArmed);
        }

        let token_address: Address = env.storage().instance().get(&TOKEN_ADDRESS).unwrap();
        let custody = env.current_contract_address();

        // There is no null address on this platform; the two addresses that
        // can never be a payee of this custody stand in for it.
        if beneficiary == custody || beneficiary == token_address {
            return Err(Error::InvalidBeneficiary);
        }
        if requested_start <= env.ledger().timestamp() {
            return Err(Error::StartInPast);
        }

        let deposit = token::Client::new(&env, &token_address).balance(&custody);
        if deposit <= 0 {
            return Err(Error::NoDeposit);
        }

        let schedule = LockSchedule {
            beneficiary: beneficiary.clone(),
            starting_time: requested_start,
            lock_periods: env.storage().instance().get(&LOCK_PERIODS).unwrap(),
            withdraw_periods: env.storage().instance().get(&WITHDRAW_PERIODS).unwrap(),
            period_duration: env.storage().instance().get(&PERIOD_DURATION).unwrap(),
            total_deposit: deposit,
            withdrawn_amount: 0,
        };
        env.storage().instance().set(&SCHEDULE, &schedule);

        env.events()
            .publish((TIMER_STARTED,), (beneficiary, requested_start, deposit));

        Ok(())
    }

    /// Calculates the amount unlocked by a schedule at a given timestamp.
    ///
    /// Unlocking happens in discrete whole-period steps: nothing before the
    /// cliff (`lock_periods` whole periods past the starting time), then one
    /// further `withdraw_periods`-th of the total deposit at the start of
    /// each subsequent period, floor division throughout. The result never
    /// depends on the withdrawn amount.
    pub fn calculate_vested_amount(
        _env: Env,
        schedule: LockSchedule,
        reference_timestamp: u64,
    ) -> i128 {
        vested_amount(&schedule, reference_timestamp)
    }

    /// Releases currently unlocked funds to the beneficiary. A request
    /// exceeding what is unlocked is capped, not rejected; a call with
    /// nothing newly unlocked fails with `StillLocked`. Returns the amount
    /// released.
    pub fn withdraw(env: Env, caller: Address, requested_amount: i128) -> Result<i128, Error> {
        Self::extend_instance_ttl(&env);

        caller.require_auth();

        let mut schedule: LockSchedule = env
            .storage()
            .instance()
            .get(&SCHEDULE)
            .ok_or(Error::NotArmed)?;
        if caller != schedule.beneficiary {
            return Err(Error::NotBeneficiary);
        }
        if requested_amount < 0 {
            return Err(Error::InvalidAmount);
        }

        let vested = vested_amount(&schedule, env.ledger().timestamp());
        if vested <= schedule.withdrawn_amount {
            return Err(Error::StillLocked);
        }

        let available = vested - schedule.withdrawn_amount;
        let release_amount = requested_amount.min(available);

        schedule.withdrawn_amount += release_amount;
        env.storage().instance().set(&SCHEDULE, &schedule);

        // A failed transfer aborts the invocation, discarding the
        // withdrawn_amount update with it.
        if release_amount > 0 {
            let token_address: Address = env.storage().instance().get(&TOKEN_ADDRESS).unwrap();
            token::Client::new(&env, &token_address).transfer(
                &env.current_contract_address(),
                &schedule.beneficiary,
                &release_amount,
            );
        }

        env.events().publish(
            (WITHDRAWN,),
            (schedule.beneficiary, release_amount, schedule.withdrawn_amount),
        );

        Ok(release_amount)
    }

    /// Returns the amount the beneficiary could withdraw right now, reading
    /// the current ledger time. Zero while unarmed or still locked.
    pub fn get_unlocked_amount(env: Env) -> i128 {
        match env.storage().instance().get::<_, LockSchedule>(&SCHEDULE) {
            Some(schedule) => {
                let vested = vested_amount(&schedule, env.ledger().timestamp());
                (vested - schedule.withdrawn_amount).max(0)
            }
            None => 0,
        }
    }

    pub fn is_armed(env: Env) -> bool {
        env.storage().instance().has(&SCHEDULE)
    }

    /// Returns the administrator of the contract.
    pub fn get_admin(env: Env) -> Address {
        env.storage().instance().get(&ADMIN).unwrap()
    }

    /// Returns the address of the token held in custody.
    pub fn get_token_address(env: Env) -> Address {
        env.storage().instance().get(&TOKEN_ADDRESS).unwrap()
    }

    /// Returns the armed schedule record.
    /// This will panic if the schedule has not been armed yet.
    pub fn get_schedule(env: Env) -> LockSchedule {
        env.storage().instance().get(&SCHEDULE).unwrap()
    }

    pub fn get_beneficiary(env: Env) -> Address {
        Self::get_schedule(env).beneficiary
    }

    pub fn get_starting_time(env: Env) -> u64 {
        Self::get_schedule(env).starting_time
    }

    /// Returns the deposit snapshot taken when the schedule was armed. This
    /// is fixed at arming time and does not track the live custody balance.
    pub fn get_total_deposit(env: Env) -> i128 {
        Self::get_schedule(env).total_deposit
    }

    /// Returns the cumulative amount released to the beneficiary so far.
    pub fn get_withdrawn_amount(env: Env) -> i128 {
        Self::get_schedule(env).withdrawn_amount
    }
}

fn vested_amount(schedule: &LockSchedule, now: u64) -> i128 {
    if now < schedule.starting_time {
        return 0;
    }
    let elapsed_periods = (now - schedule.starting_time) / schedule.period_duration;
    if elapsed_periods < schedule.lock_periods {
        return 0;
    }
    let periods_past_cliff = elapsed_periods - schedule.lock_periods;
    if periods_past_cliff >= schedule.withdraw_periods {
        return schedule.total_deposit;
    }
    schedule.total_deposit * periods_past_cliff as i128 / schedule.withdraw_periods as i128
}
