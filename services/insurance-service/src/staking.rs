use axum::{Json, extract::State};
use std::sync::Arc;
use tokio::sync::Mutex;
use ws_api_types::{
    StakeEstimateRequest, StakeEstimateResponse, StakeRequest, StakingOverviewResponse,
};
use ws_chain_client::{format_ether, parse_ether};

use crate::{ApiResult, AppState, bad_request};

const DEFAULT_PERIOD_DAYS: u32 = 30;

/// Pool figures for the staking dashboard. Seeded with the same numbers the
/// page shipped with: 1 staked, 0.05 reward per month.
pub(crate) struct StakingBook {
    total_staked_wei: Mutex<u128>,
    reward_rate_wei_per_month: u128,
}

impl Default for StakingBook {
    fn default() -> Self {
        Self {
            total_staked_wei: Mutex::new(1_000_000_000_000_000_000),
            reward_rate_wei_per_month: 50_000_000_000_000_000,
        }
    }
}

/// Projected reward for staking `amount` over `period_days`:
/// rate × amount × period / (amount + total), scaled from the monthly rate.
fn project_reward(total_wei: u128, rate_wei_per_month: u128, amount_wei: u128, period_days: u32) -> u128 {
    let staked_after = match amount_wei.checked_add(total_wei) {
        Some(sum) if sum > 0 => sum,
        _ => return 0,
    };

    rate_wei_per_month
        .checked_mul(amount_wei)
        .and_then(|value| value.checked_mul(u128::from(period_days)))
        .map(|value| value / u128::from(DEFAULT_PERIOD_DAYS) / staked_after)
        .unwrap_or(0)
}

pub(crate) async fn overview(State(state): State<Arc<AppState>>) -> Json<StakingOverviewResponse> {
    let total = *state.staking.total_staked_wei.lock().await;
    Json(StakingOverviewResponse {
        total_staked: format_ether(total),
        reward_rate_per_month: format_ether(state.staking.reward_rate_wei_per_month),
    })
}

pub(crate) async fn estimate(
    State(state): State<Arc<AppState>>,
    Json(request): Json<StakeEstimateRequest>,
) -> ApiResult<StakeEstimateResponse> {
    let amount_wei =
        parse_ether(&request.amount).map_err(|err| bad_request(&err.to_string()))?;
    let period_days = request.period_days.unwrap_or(DEFAULT_PERIOD_DAYS);
    if period_days == 0 {
        return Err(bad_request("periodDays must be greater than 0"));
    }

    let total = *state.staking.total_staked_wei.lock().await;
    let reward = project_reward(
        total,
        state.staking.reward_rate_wei_per_month,
        amount_wei,
        period_days,
    );

    Ok(Json(StakeEstimateResponse {
        amount: request.amount,
        period_days,
        projected_reward: format_ether(reward),
    }))
}

pub(crate) async fn stake(
    State(state): State<Arc<AppState>>,
    Json(request): Json<StakeRequest>,
) -> ApiResult<StakingOverviewResponse> {
    let amount_wei =
        parse_ether(&request.amount).map_err(|err| bad_request(&err.to_string()))?;
    if amount_wei == 0 {
        return Err(bad_request("amount must be greater than 0"));
    }

    let mut total = state.staking.total_staked_wei.lock().await;
    *total = total.saturating_add(amount_wei);

    Ok(Json(StakingOverviewResponse {
        total_staked: format_ether(*total),
        reward_rate_per_month: format_ether(state.staking.reward_rate_wei_per_month),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    const ONE: u128 = 1_000_000_000_000_000_000;
    const RATE: u128 = 50_000_000_000_000_000;

    #[test]
    fn thirty_day_projection_matches_the_dashboard_formula() {
        // 0.05 × 1 × 30/30 / (1 + 1) = 0.025
        let reward = project_reward(ONE, RATE, ONE, 30);
        assert_eq!(reward, 25_000_000_000_000_000);
    }

    #[test]
    fn projection_scales_with_the_period() {
        let month = project_reward(ONE, RATE, ONE, 30);
        let quarter = project_reward(ONE, RATE, ONE, 90);
        assert_eq!(quarter, month * 3);
    }

    #[test]
    fn zero_amount_projects_zero() {
        assert_eq!(project_reward(ONE, RATE, 0, 30), 0);
    }

    #[test]
    fn empty_pool_does_not_divide_by_zero() {
        assert_eq!(project_reward(0, RATE, 0, 30), 0);
    }
}
