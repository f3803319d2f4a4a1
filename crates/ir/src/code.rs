//! Operator codes for IR nodes.
//!
//! One fixed enum covers the whole operator universe: constants,
//! declarations, references, arithmetic, comparisons, statements and type
//! codes. Passes dispatch on the code with a `match`; the broad grouping
//! queries ([`Code::class`], [`Code::is_statement`], ...) exist so generic
//! tree walkers do not have to enumerate every operator.

/// Broad operator classification, in the spirit of a tree-code class table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeClass {
    Constant,
    Declaration,
    Reference,
    Unary,
    Binary,
    Comparison,
    Expression,
    Statement,
    Type,
}

/// Operator tag carried by every IR node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Code {
    // Constants.
    IntCst,
    RealCst,
    StringCst,
    ComplexCst,

    // Names and declarations.
    Identifier,
    SsaName,
    VarDecl,
    ParmDecl,
    ResultDecl,
    FunctionDecl,
    FieldDecl,
    LabelDecl,

    // References.  ops: [base] / [base, index] / [base, field].
    IndirectRef,
    ArrayRef,
    ComponentRef,
    BitFieldRef,

    // Unary expressions.  ops: [operand].
    AddrExpr,
    Negate,
    BitNot,
    TruthNot,
    Abs,
    RealPart,
    ImagPart,
    NonLvalue,
    Nop,
    Convert,
    FixTrunc,

    // Binary expressions.  ops: [lhs, rhs].
    Plus,
    Minus,
    Mult,
    TruncDiv,
    CeilDiv,
    FloorDiv,
    RoundDiv,
    ExactDiv,
    TruncMod,
    CeilMod,
    FloorMod,
    RoundMod,
    Min,
    Max,
    LShift,
    RShift,
    LRotate,
    RRotate,
    BitAnd,
    BitIor,
    BitXor,

    // Comparisons.  ops: [lhs, rhs].
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,

    // Truth operators.  The *If forms short-circuit.
    TruthAndIf,
    TruthOrIf,
    TruthAnd,
    TruthOr,
    TruthXor,

    // Structured expressions.
    /// ops: [lhs, rhs]
    Modify,
    /// ops: [pred, then, else]
    Cond,
    /// ops: [callee, arglist]
    Call,
    /// Variable arity argument list for calls.
    ArgList,
    /// Comma operator.  ops: [first, rest]
    CompoundExpr,
    /// Pre/post increment and decrement.  ops: [lvalue, step]
    PreIncrement,
    PreDecrement,
    PostIncrement,
    PostDecrement,
    /// ops: [wrapped expression]
    SaveExpr,
    /// GNU statement expression.  ops: [body compound statement]
    StmtExpr,
    CompoundLiteral,
    Constructor,
    VaArg,

    // Statements.  Chained through Node::chain.
    ExprStmt,
    CompoundStmt,
    DeclStmt,
    ScopeStmt,
    FileStmt,
    IfStmt,
    /// ops: [init expr-stmt, cond, step, body]
    ForStmt,
    WhileStmt,
    DoStmt,
    SwitchStmt,
    CaseLabel,
    LabelStmt,
    GotoStmt,
    ContinueStmt,
    BreakStmt,
    /// ops: [Modify of the result slot, or empty]
    ReturnStmt,
    AsmStmt,

    // Types.
    VoidType,
    BooleanType,
    IntegerType,
    RealType,
    ComplexType,
    PointerType,
    ArrayType,
    RecordType,
    UnionType,
    FunctionType,
}

impl Code {
    pub fn class(self) -> CodeClass {
        use Code::*;
        match self {
            IntCst | RealCst | StringCst | ComplexCst => CodeClass::Constant,

            Identifier | SsaName | VarDecl | ParmDecl | ResultDecl | FunctionDecl | FieldDecl
            | LabelDecl => CodeClass::Declaration,

            IndirectRef | ArrayRef | ComponentRef | BitFieldRef => CodeClass::Reference,

            AddrExpr | Negate | BitNot | TruthNot | Abs | RealPart | ImagPart | NonLvalue
            | Nop | Convert | FixTrunc => CodeClass::Unary,

            Plus | Minus | Mult | TruncDiv | CeilDiv | FloorDiv | RoundDiv | ExactDiv
            | TruncMod | CeilMod | FloorMod | RoundMod | Min | Max | LShift | RShift
            | LRotate | RRotate | BitAnd | BitIor | BitXor => CodeClass::Binary,

            Lt | Le | Gt | Ge | Eq | Ne => CodeClass::Comparison,

            TruthAndIf | TruthOrIf | TruthAnd | TruthOr | TruthXor | Modify | Cond | Call
            | ArgList | CompoundExpr | PreIncrement | PreDecrement | PostIncrement
            | PostDecrement | SaveExpr | StmtExpr | CompoundLiteral | Constructor | VaArg => {
                CodeClass::Expression
            }

            ExprStmt | CompoundStmt | DeclStmt | ScopeStmt | FileStmt | IfStmt | ForStmt
            | WhileStmt | DoStmt | SwitchStmt | CaseLabel | LabelStmt | GotoStmt
            | ContinueStmt | BreakStmt | ReturnStmt | AsmStmt => CodeClass::Statement,

            VoidType | BooleanType | IntegerType | RealType | ComplexType | PointerType
            | ArrayType | RecordType | UnionType | FunctionType => CodeClass::Type,
        }
    }

    pub fn is_constant(self) -> bool {
        self.class() == CodeClass::Constant
    }

    pub fn is_decl(self) -> bool {
        matches!(
            self,
            Code::VarDecl
                | Code::ParmDecl
                | Code::ResultDecl
                | Code::FunctionDecl
                | Code::FieldDecl
                | Code::LabelDecl
        )
    }

    pub fn is_statement(self) -> bool {
        self.class() == CodeClass::Statement
    }

    pub fn is_type(self) -> bool {
        self.class() == CodeClass::Type
    }

    pub fn is_comparison(self) -> bool {
        self.class() == CodeClass::Comparison
    }

    /// Nodes that are interned by the arena and therefore shared rather
    /// than copied by the tree copiers.
    pub fn is_shared(self) -> bool {
        self.is_constant() || self.is_decl() || self.is_type() || self == Code::Identifier
    }

    /// True for the self-modifying increment/decrement operators.
    pub fn is_self_mod(self) -> bool {
        matches!(
            self,
            Code::PreIncrement | Code::PreDecrement | Code::PostIncrement | Code::PostDecrement
        )
    }

    /// Operators that have a side effect regardless of their operands.
    pub fn has_inherent_side_effects(self) -> bool {
        self.is_self_mod()
            || matches!(self, Code::Modify | Code::Call | Code::VaArg | Code::AsmStmt)
    }

    /// Swap the operands of a comparison: `a < b` becomes `b > a`.
    pub fn swap_comparison(self) -> Code {
        match self {
            Code::Lt => Code::Gt,
            Code::Le => Code::Ge,
            Code::Gt => Code::Lt,
            Code::Ge => Code::Le,
            other => other,
        }
    }

    /// Invert the sense of a comparison: `a < b` becomes `a >= b`.
    pub fn invert_comparison(self) -> Code {
        match self {
            Code::Lt => Code::Ge,
            Code::Le => Code::Gt,
            Code::Gt => Code::Le,
            Code::Ge => Code::Lt,
            Code::Eq => Code::Ne,
            Code::Ne => Code::Eq,
            other => other,
        }
    }
}
