use crate::psqr::Psqr;

/// Row shape of the `psqr` snapshot table. Used by sqlx for typed queries.
#[derive(Debug, sqlx::FromRow)]
pub struct PsqrRow {
    pub id: i64,
    #[sqlx(rename = "previousPsqrId")]
    pub previous_psqr_id: Option<i64>,
    pub perc: f64,
    pub count: i64,
    pub q0: f64,
    pub q1: f64,
    pub q2: f64,
    pub q3: f64,
    pub q4: f64,
    pub n0: i64,
    pub n1: i64,
    pub n2: i64,
    pub n3: i64,
    pub n4: i64,
    pub np0: f64,
    pub np1: f64,
    pub np2: f64,
    pub np3: f64,
    pub np4: f64,
    pub dn0: f64,
    pub dn1: f64,
    pub dn2: f64,
    pub dn3: f64,
    pub dn4: f64,
}

impl PsqrRow {
    /// Rebuilds the estimator from this row. Returns None when the stored
    /// quantile is unusable, which callers treat as a missing snapshot.
    pub fn into_psqr(self) -> Option<Psqr> {
        if !(self.perc > 0.0 && self.perc < 1.0) || self.count < 0 {
            return None;
        }
        Some(Psqr::restore(
            self.perc,
            self.count,
            [self.q0, self.q1, self.q2, self.q3, self.q4],
            [self.n0, self.n1, self.n2, self.n3, self.n4],
            [self.np0, self.np1, self.np2, self.np3, self.np4],
            [self.dn0, self.dn1, self.dn2, self.dn3, self.dn4],
        ))
    }
}
