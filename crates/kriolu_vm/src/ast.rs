use std::fmt;

/// Albero diagnostico costruito dal compilatore durante il passaggio
/// unico. Serve solo al dump `-ast`: l'esecuzione passa dal bytecode.
#[derive(Debug, Clone)]
pub enum Expression {
    Number(f64),
    Str(String),
    Boolean(bool),
    Nil,
    Variable(String),
    Keli,
    Riba { method: String },
    Assign { target: Box<Expression>, value: Box<Expression> },
    Unary { operator: &'static str, operand: Box<Expression> },
    Binary { operator: &'static str, left: Box<Expression>, right: Box<Expression> },
    Call { callee: Box<Expression>, arguments: Vec<Expression> },
    ClassCall { callee: Box<Expression>, arguments: Vec<Expression> },
    Property { object: Box<Expression>, name: String },
    Interpolation { parts: Vec<Expression> },
}

#[derive(Debug, Clone)]
pub enum Statement {
    Expression(Expression),
    Print(Expression),
    VariableDeclaration { name: String, initializer: Option<Expression> },
    Block(Vec<Statement>),
    Si {
        condition: Expression,
        then_branch: Box<Statement>,
        else_branch: Option<Box<Statement>>,
    },
    Timenti { condition: Expression, body: Box<Statement> },
    Pa {
        initializer: Option<Box<Statement>>,
        condition: Option<Expression>,
        increment: Option<Expression>,
        body: Box<Statement>,
    },
    Sai,
    Salta,
    Divolvi(Option<Expression>),
    Funson { name: String, parameters: Vec<String>, body: Vec<Statement> },
    Klasi { name: String, superclass: Option<String>, methods: Vec<Statement> },
}

// ── Stampa ad albero ──────────────────────────────────────────────────────

fn pad(out: &mut String, indent: usize) {
    for _ in 0..indent {
        out.push_str("  ");
    }
}

fn line(out: &mut String, indent: usize, text: &str) {
    pad(out, indent);
    out.push_str(text);
    out.push('\n');
}

impl Expression {
    fn write_tree(&self, out: &mut String, indent: usize) {
        match self {
            Expression::Number(n)  => line(out, indent, &format!("<number {}>", n)),
            Expression::Str(s)     => line(out, indent, &format!("<string \"{}\">", s)),
            Expression::Boolean(b) => line(out, indent, &format!("<{}>", if *b { "verdadi" } else { "falsu" })),
            Expression::Nil        => line(out, indent, "<nulo>"),
            Expression::Variable(name) => line(out, indent, &format!("<variable {}>", name)),
            Expression::Keli       => line(out, indent, "<keli>"),
            Expression::Riba { method } => line(out, indent, &format!("<riba .{}>", method)),
            Expression::Assign { target, value } => {
                line(out, indent, "<assign>");
                target.write_tree(out, indent + 1);
                value.write_tree(out, indent + 1);
            }
            Expression::Unary { operator, operand } => {
                line(out, indent, &format!("<unary {}>", operator));
                operand.write_tree(out, indent + 1);
            }
            Expression::Binary { operator, left, right } => {
                line(out, indent, &format!("<binary {}>", operator));
                left.write_tree(out, indent + 1);
                right.write_tree(out, indent + 1);
            }
            Expression::Call { callee, arguments } => {
                line(out, indent, "<call>");
                callee.write_tree(out, indent + 1);
                for arg in arguments {
                    arg.write_tree(out, indent + 1);
                }
            }
            Expression::ClassCall { callee, arguments } => {
                line(out, indent, "<class-call>");
                callee.write_tree(out, indent + 1);
                for arg in arguments {
                    arg.write_tree(out, indent + 1);
                }
            }
            Expression::Property { object, name } => {
                line(out, indent, &format!("<property .{}>", name));
                object.write_tree(out, indent + 1);
            }
            Expression::Interpolation { parts } => {
                line(out, indent, "<interpolation>");
                for part in parts {
                    part.write_tree(out, indent + 1);
                }
            }
        }
    }
}

impl Statement {
    fn write_tree(&self, out: &mut String, indent: usize) {
        match self {
            Statement::Expression(e) => {
                line(out, indent, "<expression statement>");
                e.write_tree(out, indent + 1);
            }
            Statement::Print(e) => {
                line(out, indent, "<imprimi>");
                e.write_tree(out, indent + 1);
            }
            Statement::VariableDeclaration { name, initializer } => {
                line(out, indent, &format!("<mimoria {}>", name));
                if let Some(init) = initializer {
                    init.write_tree(out, indent + 1);
                }
            }
            Statement::Block(statements) => {
                line(out, indent, "<block>");
                for s in statements {
                    s.write_tree(out, indent + 1);
                }
            }
            Statement::Si { condition, then_branch, else_branch } => {
                line(out, indent, "<si>");
                line(out, indent + 1, "<condition>");
                condition.write_tree(out, indent + 2);
                line(out, indent + 1, "<then>");
                then_branch.write_tree(out, indent + 2);
                if let Some(else_branch) = else_branch {
                    line(out, indent + 1, "<sinou>");
                    else_branch.write_tree(out, indent + 2);
                }
            }
            Statement::Timenti { condition, body } => {
                line(out, indent, "<timenti>");
                line(out, indent + 1, "<condition>");
                condition.write_tree(out, indent + 2);
                line(out, indent + 1, "<body>");
                body.write_tree(out, indent + 2);
            }
            Statement::Pa { initializer, condition, increment, body } => {
                line(out, indent, "<pa>");
                if let Some(init) = initializer {
                    line(out, indent + 1, "<initializer>");
                    init.write_tree(out, indent + 2);
                }
                if let Some(cond) = condition {
                    line(out, indent + 1, "<condition>");
                    cond.write_tree(out, indent + 2);
                }
                if let Some(incr) = increment {
                    line(out, indent + 1, "<increment>");
                    incr.write_tree(out, indent + 2);
                }
                line(out, indent + 1, "<body>");
                body.write_tree(out, indent + 2);
            }
            Statement::Sai   => line(out, indent, "<sai>"),
            Statement::Salta => line(out, indent, "<salta>"),
            Statement::Divolvi(value) => {
                line(out, indent, "<divolvi>");
                if let Some(v) = value {
                    v.write_tree(out, indent + 1);
                }
            }
            Statement::Funson { name, parameters, body } => {
                line(out, indent, &format!("<funson {}({})>", name, parameters.join(", ")));
                for s in body {
                    s.write_tree(out, indent + 1);
                }
            }
            Statement::Klasi { name, superclass, methods } => {
                match superclass {
                    Some(s) => line(out, indent, &format!("<klasi {} < {}>", name, s)),
                    None => line(out, indent, &format!("<klasi {}>", name)),
                }
                for m in methods {
                    m.write_tree(out, indent + 1);
                }
            }
        }
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = String::new();
        self.write_tree(&mut out, 0);
        write!(f, "{}", out.trim_end())
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = String::new();
        self.write_tree(&mut out, 0);
        write!(f, "{}", out.trim_end())
    }
}
