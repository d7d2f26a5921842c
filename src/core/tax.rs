use serde::Deserialize;

use super::types::LiveData;

const BASE_FLOOR: f64 = 0.1;
const TAX_FLOOR: f64 = 0.0001;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ExemptionKind {
    ExemptionCard,
    StockExemption,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExemptionCard {
    limit: f64,
    yearly_increase: f64,
    used: f64,
}

impl ExemptionCard {
    pub fn new(limit: f64, yearly_increase: f64) -> Self {
        Self {
            limit,
            yearly_increase,
            used: 0.0,
        }
    }

    pub fn remaining(&self) -> f64 {
        (self.limit - self.used).max(0.0)
    }

    pub fn consume(&mut self, base: f64) -> f64 {
        let consumed = base.min(self.remaining()).max(0.0);
        self.used += consumed;
        consumed
    }

    pub fn roll_year(&mut self) {
        self.limit += self.yearly_increase;
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StockExemption {
    rate_percent: f64,
    card: ExemptionCard,
}

impl StockExemption {
    pub fn new(rate_percent: f64, limit: f64, yearly_increase: f64) -> Self {
        Self {
            rate_percent,
            card: ExemptionCard::new(limit, yearly_increase),
        }
    }

    pub fn apply(&mut self, base: f64) -> (f64, f64) {
        let consumed = self.card.consume(base);
        (consumed * self.rate_percent / 100.0, consumed)
    }

    pub fn roll_year(&mut self) {
        self.card.roll_year();
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TaxRule {
    Notional {
        rate_percent: f64,
        exemption_card: Option<ExemptionCard>,
        stock_exemption: Option<StockExemption>,
        previous_returned: f64,
    },
    Capital { rate_percent: f64 },
}

impl Default for TaxRule {
    fn default() -> Self {
        TaxRule::Capital { rate_percent: 0.0 }
    }
}

impl TaxRule {
    pub fn notional(rate_percent: f64) -> Self {
        TaxRule::Notional {
            rate_percent,
            exemption_card: None,
            stock_exemption: None,
            previous_returned: 0.0,
        }
    }

    pub fn capital(rate_percent: f64) -> Self {
        TaxRule::Capital { rate_percent }
    }

    pub fn with_exemption_card(mut self, card: ExemptionCard) -> Self {
        if let TaxRule::Notional { exemption_card, .. } = &mut self {
            *exemption_card = Some(card);
        }
        self
    }

    pub fn with_stock_exemption(mut self, stock: StockExemption) -> Self {
        if let TaxRule::Notional {
            stock_exemption, ..
        } = &mut self
        {
            *stock_exemption = Some(stock);
        }
        self
    }

    pub fn is_capital(&self) -> bool {
        matches!(self, TaxRule::Capital { .. })
    }

    /// Year-end notional tax pipeline. Deducts from `capital` and `returned`
    /// and returns the tax charged. Capital-gains rules charge nothing here.
    pub fn apply_year_end(&mut self, live: &mut LiveData, exemptions: &[ExemptionKind]) -> f64 {
        let TaxRule::Notional {
            rate_percent,
            exemption_card,
            stock_exemption,
            previous_returned,
        } = self
        else {
            live.current_tax = 0.0;
            return 0.0;
        };

        let mut base = (live.returned - *previous_returned).max(0.0);
        let mut stock_tax = 0.0;

        if base > 0.0 {
            if let Some(card) = exemption_card
                .as_mut()
                .filter(|_| exemptions.contains(&ExemptionKind::ExemptionCard))
            {
                base -= card.consume(base);
                if base < BASE_FLOOR {
                    base = 0.0;
                }
            }

            if let Some(stock) = stock_exemption
                .as_mut()
                .filter(|_| exemptions.contains(&ExemptionKind::StockExemption))
            {
                let (tax, consumed) = stock.apply(base);
                stock_tax = tax;
                base -= consumed;
                if base < BASE_FLOOR {
                    base = 0.0;
                }
            }
        }

        let notional_tax = base * *rate_percent / 100.0;
        let mut tax = stock_tax + notional_tax;
        if tax < TAX_FLOOR {
            tax = 0.0;
        }

        *previous_returned = live.returned;
        live.capital -= tax;
        live.returned -= tax;
        live.tax += tax;
        live.current_tax = tax;

        if let Some(card) = exemption_card.as_mut() {
            card.roll_year();
        }
        if let Some(stock) = stock_exemption.as_mut() {
            stock.roll_year();
        }
        tax
    }

    pub fn withdrawal_tax(&self, amount: f64) -> f64 {
        match self {
            TaxRule::Capital { rate_percent } => amount * *rate_percent / 100.0,
            TaxRule::Notional { .. } => 0.0,
        }
    }
}
