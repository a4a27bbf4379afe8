use time::{Duration, OffsetDateTime, Time, UtcOffset};

pub const WINDOW_LENGTH: Duration = Duration::DAY;

/// Call budget for one UTC day.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaWindow {
	pub window_start: OffsetDateTime,
	pub consumed: u32,
}
impl QuotaWindow {
	pub fn starting_at(now: OffsetDateTime) -> Self {
		Self { window_start: window_start_for(now), consumed: 0 }
	}

	pub fn window_end(&self) -> OffsetDateTime {
		self.window_start + WINDOW_LENGTH
	}

	/// Starts a fresh window once `now` crosses the current one's end. A clock that moves
	/// backwards keeps the current window, so quota is never handed out early.
	pub fn roll(&mut self, now: OffsetDateTime) -> bool {
		if now < self.window_end() {
			return false;
		}

		*self = Self::starting_at(now);

		true
	}

	pub fn try_consume(&mut self, daily_limit: u32, now: OffsetDateTime) -> bool {
		self.roll(now);

		if self.consumed >= daily_limit {
			return false;
		}

		self.consumed += 1;

		true
	}

	pub fn usage_fraction(&self, daily_limit: u32) -> f64 {
		if daily_limit == 0 {
			return 1.0;
		}

		f64::from(self.consumed) / f64::from(daily_limit)
	}
}

/// Midnight UTC of the day containing `now`.
pub fn window_start_for(now: OffsetDateTime) -> OffsetDateTime {
	now.to_offset(UtcOffset::UTC).replace_time(Time::MIDNIGHT)
}
