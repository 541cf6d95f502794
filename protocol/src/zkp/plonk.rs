//! Transparent PLONK backend.
//!
//! The statements are written once, as arkworks R1CS. For this backend
//! they are synthesized over the Pasta scalar field and the resulting
//! matrices are laid out as a PLONKish circuit with a single gate:
//!
//! ```text
//!  qa·a + qb·b + qc·c + qm·a·b + qk = 0
//! ```
//!
//! Every linear combination of a constraint is folded into an accumulator
//! chain (one new term per row), then a multiplication row checks
//! `A·B = C`. Copy constraints tie each occurrence of an R1CS variable to
//! its first placement, and public variables to the instance column.
//!
//! Commitments are halo2's inner-product argument over Vesta. There is no
//! trusted setup: parameters depend only on the circuit size, so every
//! node derives the same keys without sharing anything.

use std::collections::HashMap;

use ark_relations::r1cs::{ConstraintSynthesizer, ConstraintSystem, SynthesisMode};
use ff::{Field, PrimeField};
use halo2_proofs::circuit::{AssignedCell, Cell, Layouter, Region, SimpleFloorPlanner, Value};
use halo2_proofs::pasta::{EqAffine, Fp};
use halo2_proofs::plonk::{
    self as halo2, create_proof, keygen_pk, keygen_vk, verify_proof, Advice, Circuit, Column,
    Fixed, Instance, ProvingKey, SingleVerifier,
};
use halo2_proofs::poly::commitment::Params;
use halo2_proofs::poly::Rotation;
use halo2_proofs::transcript::{Blake2bRead, Blake2bWrite, Challenge255};
use rand::rngs::OsRng;

use super::field::FieldElement;
use super::prover::{synthesis, ProverError};
use super::witness::{CircuitKind, Witness};

/// The arkworks view of the Pasta scalar field the circuits are
/// synthesized over.
pub type ArkFr = ark_vesta::Fr;

/// Rows halo2 reserves for blinding, with room to spare.
const RESERVED_ROWS: usize = 16;

fn to_pasta(value: ArkFr) -> Result<Fp, ProverError> {
    Option::from(Fp::from_repr(FieldElement::from_field(value).0))
        .ok_or_else(|| ProverError::Serialization("value outside the Pasta field".into()))
}

fn halo2_error(e: halo2::Error) -> ProverError {
    ProverError::Synthesis(e.to_string())
}

// ---------------------------------------------------------------------------
// R1CS in Pasta form
// ---------------------------------------------------------------------------

/// `(coefficient, variable index)`. Index 0 is the constant one, then the
/// public inputs, then the witnesses.
type Term = (Fp, usize);

/// A circuit's constraint matrices, converted to halo2's field.
#[derive(Debug, Clone)]
pub struct R1cs {
    num_public: usize,
    num_variables: usize,
    a: Vec<Vec<Term>>,
    b: Vec<Vec<Term>>,
    c: Vec<Vec<Term>>,
}

impl R1cs {
    pub fn from_kind(kind: CircuitKind) -> Result<Self, ProverError> {
        let cs = ConstraintSystem::<ArkFr>::new_ref();
        cs.set_mode(SynthesisMode::Setup);
        kind.blank::<ArkFr>()
            .generate_constraints(cs.clone())
            .map_err(synthesis)?;
        cs.finalize();
        let m = cs
            .to_matrices()
            .ok_or_else(|| ProverError::Synthesis("constraint matrices unavailable".into()))?;

        let convert = |rows: Vec<Vec<(ArkFr, usize)>>| -> Result<Vec<Vec<Term>>, ProverError> {
            rows.into_iter()
                .map(|row| {
                    row.into_iter()
                        .map(|(coeff, index)| Ok((to_pasta(coeff)?, index)))
                        .collect()
                })
                .collect()
        };
        Ok(Self {
            num_public: m.num_instance_variables - 1,
            num_variables: m.num_instance_variables + m.num_witness_variables,
            a: convert(m.a)?,
            b: convert(m.b)?,
            c: convert(m.c)?,
        })
    }

    pub fn num_constraints(&self) -> usize {
        self.a.len()
    }

    /// Rows the layout below uses.
    fn rows(&self) -> usize {
        self.a
            .iter()
            .zip(&self.b)
            .zip(&self.c)
            .map(|((a, b), c)| combine_rows(a) + combine_rows(b) + combine_rows(c) + 1)
            .sum()
    }

    /// Smallest domain that fits the layout.
    fn k(&self) -> u32 {
        let needed = self.rows() + RESERVED_ROWS;
        needed.next_power_of_two().trailing_zeros().max(4)
    }

    /// The full variable vector `[1, public.., witness..]` for `witness`.
    fn assignment(&self, witness: &Witness) -> Result<Vec<Fp>, ProverError> {
        let cs = ConstraintSystem::<ArkFr>::new_ref();
        witness
            .to_circuit::<ArkFr>()
            .generate_constraints(cs.clone())
            .map_err(synthesis)?;
        let cs = cs
            .borrow()
            .ok_or_else(|| ProverError::Synthesis("constraint system unavailable".into()))?;
        let z = cs
            .instance_assignment
            .iter()
            .chain(&cs.witness_assignment)
            .map(|x| to_pasta(*x))
            .collect::<Result<Vec<_>, _>>()?;
        if z.len() != self.num_variables {
            return Err(ProverError::Synthesis(format!(
                "assignment has {} variables, circuit has {}",
                z.len(),
                self.num_variables
            )));
        }
        Ok(z)
    }
}

/// Split off the constant term.
fn split(lc: &[Term]) -> (Fp, Vec<Term>) {
    let mut constant = Fp::ZERO;
    let mut vars = Vec::with_capacity(lc.len());
    for &(coeff, index) in lc {
        if index == 0 {
            constant += coeff;
        } else {
            vars.push((coeff, index));
        }
    }
    (constant, vars)
}

/// A bare variable needs no rows of its own.
fn bare(constant: Fp, vars: &[Term]) -> Option<usize> {
    match vars {
        [(coeff, index)] if constant == Fp::ZERO && *coeff == Fp::ONE => Some(*index),
        _ => None,
    }
}

fn combine_rows(lc: &[Term]) -> usize {
    let (constant, vars) = split(lc);
    if bare(constant, &vars).is_some() {
        0
    } else if vars.is_empty() {
        1
    } else {
        1 + vars.len().saturating_sub(2)
    }
}

// ---------------------------------------------------------------------------
// Circuit
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
pub struct GateConfig {
    a: Column<Advice>,
    b: Column<Advice>,
    c: Column<Advice>,
    qa: Column<Fixed>,
    qb: Column<Fixed>,
    qc: Column<Fixed>,
    qm: Column<Fixed>,
    qk: Column<Fixed>,
    instance: Column<Instance>,
}

/// R1CS matrices plus, when proving, the assignment.
pub struct R1csCircuit<'a> {
    r1cs: &'a R1cs,
    assignment: Option<&'a [Fp]>,
}

impl Circuit<Fp> for R1csCircuit<'_> {
    type Config = GateConfig;
    type FloorPlanner = SimpleFloorPlanner;

    fn without_witnesses(&self) -> Self {
        Self {
            r1cs: self.r1cs,
            assignment: None,
        }
    }

    fn configure(meta: &mut halo2::ConstraintSystem<Fp>) -> GateConfig {
        let config = GateConfig {
            a: meta.advice_column(),
            b: meta.advice_column(),
            c: meta.advice_column(),
            qa: meta.fixed_column(),
            qb: meta.fixed_column(),
            qc: meta.fixed_column(),
            qm: meta.fixed_column(),
            qk: meta.fixed_column(),
            instance: meta.instance_column(),
        };
        for column in [config.a, config.b, config.c] {
            meta.enable_equality(column);
        }
        meta.enable_equality(config.instance);

        meta.create_gate("r1cs row", |meta| {
            let a = meta.query_advice(config.a, Rotation::cur());
            let b = meta.query_advice(config.b, Rotation::cur());
            let c = meta.query_advice(config.c, Rotation::cur());
            let qa = meta.query_fixed(config.qa);
            let qb = meta.query_fixed(config.qb);
            let qc = meta.query_fixed(config.qc);
            let qm = meta.query_fixed(config.qm);
            let qk = meta.query_fixed(config.qk);
            vec![qa * a.clone() + qb * b.clone() + qc * c + qm * a * b + qk]
        });
        config
    }

    fn synthesize(&self, config: GateConfig, mut layouter: impl Layouter<Fp>) -> Result<(), halo2::Error> {
        layouter.assign_region(
            || "r1cs",
            |region| {
                let mut filler = Filler {
                    region,
                    config,
                    num_public: self.r1cs.num_public,
                    assignment: self.assignment,
                    offset: 0,
                    placed: HashMap::new(),
                };
                for ((a, b), c) in self.r1cs.a.iter().zip(&self.r1cs.b).zip(&self.r1cs.c) {
                    let a = filler.combine(a)?;
                    let b = filler.combine(b)?;
                    let c = filler.combine(c)?;
                    filler.multiply(a, b, c)?;
                }
                Ok(())
            },
        )
    }
}

enum Operand {
    Var(usize),
    Cell(AssignedCell<Fp, Fp>),
}

struct Filler<'r, 'a> {
    region: Region<'r, Fp>,
    config: GateConfig,
    num_public: usize,
    assignment: Option<&'a [Fp]>,
    offset: usize,
    /// First placement of each variable.
    placed: HashMap<usize, Cell>,
}

impl Filler<'_, '_> {
    fn value(&self, index: usize) -> Value<Fp> {
        self.assignment
            .and_then(|z| z.get(index).copied())
            .map_or_else(Value::unknown, Value::known)
    }

    fn selectors(&mut self, [qa, qb, qc, qm, qk]: [Fp; 5]) -> Result<(), halo2::Error> {
        let offset = self.offset;
        for (column, q) in [
            (self.config.qa, qa),
            (self.config.qb, qb),
            (self.config.qc, qc),
            (self.config.qm, qm),
            (self.config.qk, qk),
        ] {
            self.region
                .assign_fixed(|| "selector", column, offset, || Value::known(q))?;
        }
        Ok(())
    }

    /// Put variable `index` in `column` on the current row.
    fn place(&mut self, column: Column<Advice>, index: usize) -> Result<AssignedCell<Fp, Fp>, halo2::Error> {
        let offset = self.offset;
        let first = self.placed.get(&index).copied();
        if first.is_none() && (1..=self.num_public).contains(&index) {
            let cell = self.region.assign_advice_from_instance(
                || "public input",
                self.config.instance,
                index - 1,
                column,
                offset,
            )?;
            self.placed.insert(index, cell.cell());
            return Ok(cell);
        }
        let value = self.value(index);
        let cell = self.region.assign_advice(|| "variable", column, offset, || value)?;
        match first {
            Some(first) => self.region.constrain_equal(cell.cell(), first)?,
            None => {
                self.placed.insert(index, cell.cell());
            }
        }
        Ok(cell)
    }

    fn combine(&mut self, lc: &[Term]) -> Result<Operand, halo2::Error> {
        let (constant, vars) = split(lc);
        if let Some(index) = bare(constant, &vars) {
            return Ok(Operand::Var(index));
        }
        let (a, b, c) = (self.config.a, self.config.b, self.config.c);

        if vars.is_empty() {
            let cell = self
                .region
                .assign_advice(|| "constant", a, self.offset, || Value::known(constant))?;
            self.selectors([Fp::ONE, Fp::ZERO, Fp::ZERO, Fp::ZERO, -constant])?;
            self.offset += 1;
            return Ok(Operand::Cell(cell));
        }

        // First row: up to two terms plus the constant.
        let (c1, first) = match vars.first() {
            Some(&(c1, i1)) => (c1, self.place(a, i1)?.value().copied()),
            None => (Fp::ZERO, Value::known(Fp::ZERO)),
        };
        let (c2, second) = match vars.get(1) {
            Some(&(c2, i2)) => (c2, self.place(b, i2)?.value().copied()),
            None => (Fp::ZERO, Value::known(Fp::ZERO)),
        };
        let sum = first.zip(second).map(|(x, y)| c1 * x + c2 * y + constant);
        let mut acc = self.region.assign_advice(|| "sum", c, self.offset, || sum)?;
        self.selectors([c1, c2, -Fp::ONE, Fp::ZERO, constant])?;
        self.offset += 1;

        for &(coeff, index) in vars.iter().skip(2) {
            let prev = acc.copy_advice(|| "sum", &mut self.region, a, self.offset)?;
            let term = self.place(b, index)?;
            let sum = prev
                .value()
                .copied()
                .zip(term.value().copied())
                .map(|(p, t)| p + coeff * t);
            acc = self.region.assign_advice(|| "sum", c, self.offset, || sum)?;
            self.selectors([Fp::ONE, coeff, -Fp::ONE, Fp::ZERO, Fp::ZERO])?;
            self.offset += 1;
        }
        Ok(Operand::Cell(acc))
    }

    fn put(&mut self, column: Column<Advice>, operand: Operand) -> Result<(), halo2::Error> {
        match operand {
            Operand::Var(index) => self.place(column, index).map(|_| ()),
            Operand::Cell(cell) => cell
                .copy_advice(|| "operand", &mut self.region, column, self.offset)
                .map(|_| ()),
        }
    }

    /// `a · b = c` on one row.
    fn multiply(&mut self, a: Operand, b: Operand, c: Operand) -> Result<(), halo2::Error> {
        self.put(self.config.a, a)?;
        self.put(self.config.b, b)?;
        self.put(self.config.c, c)?;
        self.selectors([Fp::ZERO, Fp::ZERO, -Fp::ONE, Fp::ONE, Fp::ZERO])?;
        self.offset += 1;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Keys, prove, verify
// ---------------------------------------------------------------------------

/// IPA parameters and keys for one circuit.
pub struct PlonkKeys {
    params: Params<EqAffine>,
    pk: ProvingKey<EqAffine>,
    r1cs: R1cs,
}

impl PlonkKeys {
    pub fn num_constraints(&self) -> usize {
        self.r1cs.num_constraints()
    }
}

pub fn setup(kind: CircuitKind) -> Result<PlonkKeys, ProverError> {
    let r1cs = R1cs::from_kind(kind)?;
    let params = Params::<EqAffine>::new(r1cs.k());
    let blank = R1csCircuit {
        r1cs: &r1cs,
        assignment: None,
    };
    let vk = keygen_vk(&params, &blank).map_err(halo2_error)?;
    let pk = keygen_pk(&params, vk, &blank).map_err(halo2_error)?;
    Ok(PlonkKeys { params, pk, r1cs })
}

pub fn prove(keys: &PlonkKeys, witness: &Witness) -> Result<Vec<u8>, ProverError> {
    let z = keys.r1cs.assignment(witness)?;
    let public = z
        .get(1..=keys.r1cs.num_public)
        .ok_or_else(|| ProverError::Synthesis("public inputs missing from assignment".into()))?;
    let circuit = R1csCircuit {
        r1cs: &keys.r1cs,
        assignment: Some(&z),
    };
    let instance: &[&[Fp]] = &[public];
    let mut transcript = Blake2bWrite::<_, EqAffine, Challenge255<_>>::init(vec![]);
    create_proof(&keys.params, &keys.pk, &[circuit], &[instance], OsRng, &mut transcript)
        .map_err(halo2_error)?;
    Ok(transcript.finalize())
}

/// `Ok(false)` for a proof that parses but does not verify.
pub fn verify(keys: &PlonkKeys, data: &[u8], public_inputs: &[FieldElement]) -> Result<bool, ProverError> {
    let public = public_inputs
        .iter()
        .map(|x| to_pasta(x.to_field::<ArkFr>()))
        .collect::<Result<Vec<_>, _>>()?;
    let instance: &[&[Fp]] = &[&public];
    let strategy = SingleVerifier::new(&keys.params);
    let mut transcript = Blake2bRead::<_, EqAffine, Challenge255<_>>::init(data);
    match verify_proof(&keys.params, keys.pk.get_vk(), strategy, &[instance], &mut transcript) {
        Ok(()) => Ok(true),
        Err(halo2::Error::Transcript(e)) => Err(ProverError::Serialization(e.to_string())),
        Err(_) => Ok(false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use halo2_proofs::dev::MockProver;

    fn balance(balance: u64, threshold: u64) -> Witness {
        Witness::BalanceRange { balance, threshold }
    }

    #[test]
    fn layout_satisfies_the_gate_and_copies() {
        let r1cs = R1cs::from_kind(CircuitKind::BalanceRange).unwrap();
        assert_eq!(r1cs.num_public, 1);
        let z = r1cs.assignment(&balance(500, 120)).unwrap();
        let circuit = R1csCircuit {
            r1cs: &r1cs,
            assignment: Some(&z),
        };
        let public = z[1..=r1cs.num_public].to_vec();

        let mock = MockProver::run(r1cs.k(), &circuit, vec![public]).unwrap();
        assert_eq!(mock.verify(), Ok(()));

        // Same assignment, different threshold on the instance column.
        let lied = vec![vec![Fp::from(100u64)]];
        let mock = MockProver::run(r1cs.k(), &circuit, lied).unwrap();
        assert!(mock.verify().is_err());
    }

    #[test]
    fn tampered_witness_breaks_the_layout() {
        let r1cs = R1cs::from_kind(CircuitKind::WalletOwnership).unwrap();
        let response = FieldElement::from_u64(7);
        let challenge = FieldElement::from_u64(11);
        let witness = Witness::WalletOwnership {
            response,
            challenge,
            public_key_hash: crate::zkp::ProofScheme::Plonk.hash(&[response, challenge]),
        };
        let mut z = r1cs.assignment(&witness).unwrap();
        let public = z[1..=r1cs.num_public].to_vec();
        let last = z.len() - 1;
        z[last] += Fp::ONE;

        let circuit = R1csCircuit {
            r1cs: &r1cs,
            assignment: Some(&z),
        };
        let mock = MockProver::run(r1cs.k(), &circuit, vec![public]).unwrap();
        assert!(mock.verify().is_err());
    }

    #[test]
    fn bare_variables_take_no_rows() {
        assert_eq!(combine_rows(&[(Fp::ONE, 3)]), 0);
        assert_eq!(combine_rows(&[(Fp::from(2u64), 3)]), 1);
        assert_eq!(combine_rows(&[(Fp::ONE, 0)]), 1);
        assert_eq!(combine_rows(&[(Fp::ONE, 1), (Fp::ONE, 2), (Fp::ONE, 3), (Fp::ONE, 0)]), 2);
    }
}
